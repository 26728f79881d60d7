// ── Site inclusion ──
//
// Decides which directory entries the exporter cares about. Both the
// reconciler and the scrape collector run the directory through
// `select_sites`, so a site is either streamed and polled, or neither.

use glob::{MatchOptions, Pattern};
use mistex_api::Site;
use tracing::warn;

use crate::error::CoreError;

/// Fallible site inclusion test.
///
/// An `Err` means "could not decide"; callers treat the site as
/// excluded for the current cycle.
pub trait SitePredicate: Send + Sync {
    fn included(&self, site: &Site) -> Result<bool, CoreError>;
}

impl<F> SitePredicate for F
where
    F: Fn(&Site) -> Result<bool, CoreError> + Send + Sync,
{
    fn included(&self, site: &Site) -> Result<bool, CoreError> {
        self(site)
    }
}

/// Include/exclude glob lists matched against the site name.
///
/// Exclusion wins. An empty include list admits every site that is not
/// excluded. `*` does not cross `/`, matching shell-style globbing.
#[derive(Debug, Clone, Default)]
pub struct SiteFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl SiteFilter {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self, CoreError> {
        Ok(Self {
            include: compile("include", include)?,
            exclude: compile("exclude", exclude)?,
        })
    }

    /// A filter that admits every site.
    pub fn allow_all() -> Self {
        Self::default()
    }

    fn matches_any(patterns: &[Pattern], name: &str) -> bool {
        patterns.iter().any(|p| p.matches_with(name, MATCH_OPTIONS))
    }
}

fn compile<S: AsRef<str>>(kind: &str, patterns: &[S]) -> Result<Vec<Pattern>, CoreError> {
    patterns
        .iter()
        .map(|p| {
            let p = p.as_ref();
            Pattern::new(p).map_err(|e| CoreError::Config {
                message: format!("invalid {kind} glob pattern {p:?}: {e}"),
            })
        })
        .collect()
}

impl SitePredicate for SiteFilter {
    fn included(&self, site: &Site) -> Result<bool, CoreError> {
        if Self::matches_any(&self.exclude, &site.name) {
            return Ok(false);
        }
        if self.include.is_empty() {
            return Ok(true);
        }
        Ok(Self::matches_any(&self.include, &site.name))
    }
}

/// Keep the sites `predicate` admits. Predicate errors are logged and
/// the site is dropped for this cycle.
pub fn select_sites(predicate: &dyn SitePredicate, sites: Vec<Site>) -> Vec<Site> {
    sites
        .into_iter()
        .filter(|site| match predicate.included(site) {
            Ok(keep) => keep,
            Err(e) => {
                let err = CoreError::FilterEvaluationFailed {
                    site: site.name.clone(),
                    reason: e.to_string(),
                };
                warn!(site_id = %site.id, error = %err, "excluding site");
                false
            }
        })
        .collect()
}

use super::{FilterError, ResponseFilter};
use crate::context::RequestContext;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Builds one filter instance when the registry is materialized.
pub type FilterConstructor =
    Box<dyn Fn() -> Result<Arc<dyn ResponseFilter>, FilterError> + Send + Sync>;

/// Maps filter names to constructors. Filters register themselves under a
/// fixed, unique name during process setup; [`FilterRegistry::build_all`]
/// then instantiates each exactly once, before traffic is admitted.
#[derive(Default)]
pub struct FilterRegistry {
    constructors: BTreeMap<&'static str, FilterConstructor>,
}

impl FilterRegistry {
    pub fn register(
        &mut self,
        name: &'static str,
        constructor: FilterConstructor,
    ) -> Result<(), FilterError> {
        if self.constructors.contains_key(name) {
            return Err(FilterError::DuplicateFilter(name));
        }
        self.constructors.insert(name, constructor);
        Ok(())
    }

    /// Instantiates every registered filter. Constructor failures (for
    /// example a malformed target address) abort setup so a misconfigured
    /// filter never serves traffic.
    pub fn build_all(&self) -> Result<FilterChain, FilterError> {
        let mut filters = Vec::with_capacity(self.constructors.len());
        for (name, constructor) in &self.constructors {
            let filter = constructor()?;
            info!("Instantiated response filter '{}'", name);
            filters.push(filter);
        }
        Ok(FilterChain { filters })
    }
}

#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn ResponseFilter>>,
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.filters.iter().map(|f| f.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl FilterChain {
    /// Finds the filter whose gate approves this request, if any.
    pub fn select(&self, ctx: &RequestContext) -> Option<Arc<dyn ResponseFilter>> {
        self.filters
            .iter()
            .find(|filter| filter.approve(ctx.component(), ctx.resource(), ctx.verb()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

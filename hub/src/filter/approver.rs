use crate::context::Verb;
use std::collections::BTreeSet;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

/// A delegated approval check composed into an [`Approver`]. Must be pure:
/// it is called concurrently from every request-handling context.
pub type BaseApproval = Arc<dyn Fn(&str, &str, Verb) -> bool + Send + Sync>;

/// Decides whether a filter applies to a (component, resource, verb) triple.
///
/// The identity is fixed at construction and never mutated, so approval is
/// safe to call from concurrent requests without locking.
#[derive(Clone)]
pub struct Approver {
    component: String,
    resource: String,
    verbs: BTreeSet<Verb>,
    base: Option<BaseApproval>,
}

impl Approver {
    pub fn new(
        component: impl Into<String>,
        resource: impl Into<String>,
        verbs: impl IntoIterator<Item = Verb>,
    ) -> Self {
        Self {
            component: component.into(),
            resource: resource.into(),
            verbs: verbs.into_iter().collect(),
            base: None,
        }
    }

    /// Composes a base-layer approval check; both this approver's identity
    /// and the base check must pass.
    pub fn with_base(mut self, base: BaseApproval) -> Self {
        self.base = Some(base);
        self
    }

    pub fn approve(&self, component: &str, resource: &str, verb: Verb) -> bool {
        component == self.component
            && resource == self.resource
            && self.verbs.contains(&verb)
            && self
                .base
                .as_ref()
                .is_none_or(|base| base(component, resource, verb))
    }
}

impl Debug for Approver {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Approver")
            .field("component", &self.component)
            .field("resource", &self.resource)
            .field("verbs", &self.verbs)
            .field("base", &self.base.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn approver() -> Approver {
        Approver::new("kubelet", "services", [Verb::List, Verb::Watch])
    }

    #[rstest]
    #[case("kubelet", "services", Verb::List, true)]
    #[case("kubelet", "services", Verb::Watch, true)]
    #[case("kubelet", "services", Verb::Get, false)]
    #[case("kubelet", "endpoints", Verb::List, false)]
    #[case("kube-proxy", "services", Verb::List, false)]
    #[case("", "services", Verb::List, false)]
    #[case("kubelet", "", Verb::Watch, false)]
    fn test_approve(
        approver: Approver,
        #[case] component: &str,
        #[case] resource: &str,
        #[case] verb: Verb,
        #[case] expected: bool,
    ) {
        assert_eq!(approver.approve(component, resource, verb), expected);
    }

    #[rstest]
    fn test_approve_is_pure(approver: Approver) {
        for _ in 0..3 {
            assert!(approver.approve("kubelet", "services", Verb::List));
        }
    }

    #[rstest]
    fn test_base_check_can_deny(approver: Approver) {
        let approver = approver.with_base(Arc::new(|_, _, _| false));
        assert!(!approver.approve("kubelet", "services", Verb::List));
    }

    #[rstest]
    fn test_base_check_sees_the_triple(approver: Approver) {
        let approver = approver.with_base(Arc::new(|component, resource, verb| {
            component == "kubelet" && resource == "services" && verb == Verb::Watch
        }));
        assert!(approver.approve("kubelet", "services", Verb::Watch));
        assert!(!approver.approve("kubelet", "services", Verb::List));
    }

    proptest! {
        #[test]
        fn test_only_the_fixed_identity_is_approved(
            component in "[a-z-]{1,12}",
            resource in "[a-z]{1,12}",
        ) {
            let approver = Approver::new("kubelet", "services", [Verb::List, Verb::Watch]);
            let expected = component == "kubelet" && resource == "services";
            prop_assert_eq!(approver.approve(&component, &resource, Verb::List), expected);
            prop_assert!(!approver.approve(&component, &resource, Verb::Get));
        }
    }
}

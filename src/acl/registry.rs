//! Role registry and composition
//!
//! Loads the role → ACL table from a YAML file at startup and, per request,
//! combines the roles presented by an identity claim into one effective
//! ACL. With assumed roles enabled, unknown role names are treated as
//! inline single-term ACL fragments on the assumed-role label.

use crate::acl::compiler::{Acl, CompiledRule};
use crate::acl::filter::{FULL_ACCESS_VALUE, LabelFilter};
use crate::error::AclError;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Label an assumed role constrains when its name is compiled inline.
pub const DEFAULT_ASSUMED_LABEL: &str = "namespace";

/// Immutable role → ACL table.
#[derive(Debug, Clone)]
pub struct AclRegistry {
    roles: HashMap<String, Acl>,
    assumed_label: String,
}

impl AclRegistry {
    /// A registry with no roles.
    pub fn empty() -> Self {
        Self {
            roles: HashMap::new(),
            assumed_label: DEFAULT_ASSUMED_LABEL.to_string(),
        }
    }

    /// Load role definitions from a YAML file.
    ///
    /// An empty (or whitespace-only) path yields an empty registry, so a
    /// deployment running purely on assumed roles needs no file at all.
    pub fn from_file(path: &str) -> Result<Self, AclError> {
        let path = path.trim();
        if path.is_empty() {
            return Ok(Self::empty());
        }

        let source = std::fs::read_to_string(path)?;
        Self::from_yaml(&source)
    }

    /// Load role definitions from a YAML string.
    pub fn from_yaml(source: &str) -> Result<Self, AclError> {
        let doc: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(source)?;

        let mut roles = HashMap::with_capacity(doc.len());
        for (role, body) in doc {
            // Re-serialize the role's sub-document and hand it to the
            // compiler, so a role body is validated exactly like a
            // standalone definition.
            let raw = serde_yaml::to_string(&body)?;
            let acl =
                Acl::from_yaml(&raw).map_err(|e| AclError::for_role(role.clone(), e))?;
            roles.insert(role, acl);
        }

        Ok(Self {
            roles,
            assumed_label: DEFAULT_ASSUMED_LABEL.to_string(),
        })
    }

    /// Override the label assumed roles constrain (default: `namespace`).
    pub fn with_assumed_label(mut self, label: impl Into<String>) -> Self {
        self.assumed_label = label.into();
        self
    }

    /// Number of known roles.
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Whether the registry has no roles.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Look up a role's ACL.
    pub fn get(&self, role: &str) -> Option<&Acl> {
        self.roles.get(role)
    }

    /// Combine the caller's roles into one effective ACL.
    ///
    /// Roles are processed in claim order; duplicates are preserved. Known
    /// roles contribute their compiled rules. Unknown roles are skipped
    /// unless `assumed_roles_enabled`, in which case the role name itself
    /// is compiled as a rule on the assumed-role label. Fails with
    /// `NoMatchingRoles` when nothing contributes.
    pub fn compose(
        &self,
        roles: &[String],
        assumed_roles_enabled: bool,
    ) -> Result<Acl, AclError> {
        let contributions = self.resolve_roles(roles, assumed_roles_enabled)?;

        let mut merged: BTreeMap<String, LabelFilter> = BTreeMap::new();
        for acl in contributions.iter().flatten() {
            for (label, rule) in acl.rules() {
                match merged.get_mut(label) {
                    Some(existing) => *existing = merge_label_filters(existing, &rule.filter),
                    None => {
                        merged.insert(label.clone(), rule.filter.clone());
                    }
                }
            }
        }

        if merged.is_empty() {
            return Err(AclError::NoMatchingRoles);
        }

        let mut rules = BTreeMap::new();
        for (label, filter) in merged {
            let raw_acl = compose_raw_acl(&contributions, &label)?;
            let full_access = filter.value == FULL_ACCESS_VALUE;
            debug!(label = %label, raw = %raw_acl, full_access, "composed rule");
            rules.insert(
                label,
                CompiledRule {
                    filter,
                    full_access,
                    raw_acl,
                },
            );
        }

        Ok(Acl::from_rules(rules))
    }

    /// Resolve each claimed role to the ACL it contributes, keeping claim
    /// order. `None` marks a skipped unknown role.
    fn resolve_roles(
        &self,
        roles: &[String],
        assumed_roles_enabled: bool,
    ) -> Result<Vec<Option<Acl>>, AclError> {
        let mut contributions = Vec::with_capacity(roles.len());
        for role in roles {
            if let Some(acl) = self.roles.get(role) {
                contributions.push(Some(acl.clone()));
            } else if assumed_roles_enabled {
                // Role names are not linted; they may be regexps, including
                // the admin spelling `.*`.
                let source = format!("metrics:\n  {}: '{}'\n", self.assumed_label, role);
                let acl = Acl::from_yaml(&source)
                    .map_err(|e| AclError::for_role(role.clone(), e))?;
                debug!(role = %role, label = %self.assumed_label, "assumed role");
                contributions.push(Some(acl));
            } else {
                debug!(role = %role, "skipping unknown role");
                contributions.push(None);
            }
        }
        Ok(contributions)
    }
}

/// Merge two filters on the same label. Full access dominates; anything
/// else unions into an alternation.
fn merge_label_filters(a: &LabelFilter, b: &LabelFilter) -> LabelFilter {
    let value = if a.value == FULL_ACCESS_VALUE || b.value == FULL_ACCESS_VALUE {
        FULL_ACCESS_VALUE.to_string()
    } else {
        format!("{}|{}", a.value, b.value)
    };
    LabelFilter {
        label: a.label.clone(),
        value,
        is_regexp: true,
        is_negative: a.is_negative && b.is_negative,
    }
}

/// Join the contributing roles' raw forms for one label, in claim order.
/// Any `.*` contributor short-circuits the whole label to `.*`.
fn compose_raw_acl(contributions: &[Option<Acl>], label: &str) -> Result<String, AclError> {
    let mut raws: Vec<&str> = Vec::with_capacity(contributions.len());
    for acl in contributions.iter().flatten() {
        if let Some(rule) = acl.get(label) {
            if rule.raw_acl == FULL_ACCESS_VALUE {
                return Ok(FULL_ACCESS_VALUE.to_string());
            }
            raws.push(&rule.raw_acl);
        }
    }

    let raw_acl = raws.join(", ");
    if raw_acl.is_empty() {
        return Err(AclError::EmptyRawAcl {
            label: label.to_string(),
        });
    }
    Ok(raw_acl)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_ROLES: &str = "\
single:
  metrics:
    namespace: minio
multiple:
  metrics:
    namespace: 'min.*, stolon'
    environment: dev
admin:
  metrics:
    namespace: '.*'
";

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_file_empty_path_yields_empty_registry() {
        let registry = AclRegistry::from_file("").unwrap();
        assert!(registry.is_empty());
        let registry = AclRegistry::from_file("   ").unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_from_yaml_compiles_every_role() {
        let registry = AclRegistry::from_yaml(TWO_ROLES).unwrap();
        assert_eq!(registry.len(), 3);

        let single = registry.get("single").unwrap();
        assert_eq!(
            single.get("namespace").unwrap().filter,
            LabelFilter::equality("namespace", "minio")
        );

        let multiple = registry.get("multiple").unwrap();
        assert_eq!(
            multiple.get("namespace").unwrap().filter,
            LabelFilter::regexp("namespace", "min.*|stolon")
        );
        assert_eq!(multiple.get("namespace").unwrap().raw_acl, "min.*,stolon");
    }

    #[test]
    fn test_from_yaml_names_the_broken_role() {
        let err = AclRegistry::from_yaml("broken:\n  metrics:\n    namespace: '['\n").unwrap_err();
        match err {
            AclError::Role { role, source } => {
                assert_eq!(role, "broken");
                assert!(matches!(*source, AclError::InvalidRegex { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_compose_single_known_role() {
        let registry = AclRegistry::from_yaml(TWO_ROLES).unwrap();
        let acl = registry.compose(&roles(&["single"]), false).unwrap();

        let rule = acl.get("namespace").unwrap();
        assert_eq!(rule.filter, LabelFilter::equality("namespace", "minio"));
        assert_eq!(rule.raw_acl, "minio");
        assert!(!rule.full_access);
    }

    #[test]
    fn test_compose_merges_two_roles_into_alternation() {
        let registry = AclRegistry::from_yaml(
            "a:\n  metrics:\n    ns: x\nb:\n  metrics:\n    ns: y\n",
        )
        .unwrap();
        let acl = registry.compose(&roles(&["a", "b"]), false).unwrap();

        let rule = acl.get("ns").unwrap();
        assert_eq!(rule.filter, LabelFilter::regexp("ns", "x|y"));
        assert_eq!(rule.raw_acl, "x, y");
    }

    #[test]
    fn test_compose_full_access_dominates() {
        let registry = AclRegistry::from_yaml(TWO_ROLES).unwrap();
        let acl = registry
            .compose(&roles(&["single", "admin", "multiple"]), false)
            .unwrap();

        let rule = acl.get("namespace").unwrap();
        assert_eq!(rule.filter.value, ".*");
        assert!(rule.full_access);
        assert_eq!(rule.raw_acl, ".*");
    }

    #[test]
    fn test_compose_labels_stay_independent() {
        let registry = AclRegistry::from_yaml(TWO_ROLES).unwrap();
        let acl = registry
            .compose(&roles(&["single", "multiple"]), false)
            .unwrap();

        // namespace merges across both roles; environment comes from one.
        assert_eq!(
            acl.get("namespace").unwrap().filter,
            LabelFilter::regexp("namespace", "minio|min.*|stolon")
        );
        assert_eq!(acl.get("namespace").unwrap().raw_acl, "minio, min.*,stolon");

        let env = acl.get("environment").unwrap();
        assert_eq!(env.filter, LabelFilter::equality("environment", "dev"));
        assert_eq!(env.raw_acl, "dev");
    }

    #[test]
    fn test_compose_unknown_roles_are_skipped() {
        let registry = AclRegistry::from_yaml(TWO_ROLES).unwrap();
        let acl = registry
            .compose(&roles(&["absent", "single"]), false)
            .unwrap();
        assert_eq!(
            acl.get("namespace").unwrap().filter,
            LabelFilter::equality("namespace", "minio")
        );
    }

    #[test]
    fn test_compose_no_matching_roles() {
        let registry = AclRegistry::from_yaml(TWO_ROLES).unwrap();
        let err = registry.compose(&roles(&["absent"]), false).unwrap_err();
        assert!(matches!(err, AclError::NoMatchingRoles));

        let err = registry.compose(&[], false).unwrap_err();
        assert!(matches!(err, AclError::NoMatchingRoles));
    }

    #[test]
    fn test_compose_assumed_role() {
        let registry = AclRegistry::from_yaml(TWO_ROLES).unwrap();
        let acl = registry.compose(&roles(&["team-a"]), true).unwrap();

        let rule = acl.get("namespace").unwrap();
        assert_eq!(rule.filter, LabelFilter::equality("namespace", "team-a"));
        assert_eq!(rule.raw_acl, "team-a");
    }

    #[test]
    fn test_compose_assumed_role_merges_with_known_role() {
        let registry = AclRegistry::from_yaml(TWO_ROLES).unwrap();
        let acl = registry
            .compose(&roles(&["single", "team-a"]), true)
            .unwrap();

        let rule = acl.get("namespace").unwrap();
        assert_eq!(rule.filter, LabelFilter::regexp("namespace", "minio|team-a"));
        assert_eq!(rule.raw_acl, "minio, team-a");
    }

    #[test]
    fn test_compose_assumed_admin_role() {
        let registry = AclRegistry::from_yaml(TWO_ROLES).unwrap();
        let acl = registry.compose(&roles(&["single", ".*"]), true).unwrap();

        let rule = acl.get("namespace").unwrap();
        assert_eq!(rule.filter.value, ".*");
        assert!(rule.full_access);
        assert_eq!(rule.raw_acl, ".*");
    }

    #[test]
    fn test_compose_assumed_role_does_not_touch_other_labels() {
        let registry = AclRegistry::from_yaml(TWO_ROLES).unwrap();
        let acl = registry
            .compose(&roles(&["multiple", "team-a"]), true)
            .unwrap();

        // The assumed role covers only the namespace label; environment's
        // raw form must not pick up the role name.
        assert_eq!(acl.get("environment").unwrap().raw_acl, "dev");
        assert_eq!(
            acl.get("namespace").unwrap().raw_acl,
            "min.*,stolon, team-a"
        );
    }

    #[test]
    fn test_compose_duplicate_roles_are_preserved() {
        let registry =
            AclRegistry::from_yaml("a:\n  metrics:\n    ns: x\n").unwrap();
        let acl = registry.compose(&roles(&["a", "a"]), false).unwrap();

        let rule = acl.get("ns").unwrap();
        assert_eq!(rule.filter, LabelFilter::regexp("ns", "x|x"));
        assert_eq!(rule.raw_acl, "x, x");
    }

    #[test]
    fn test_custom_assumed_label() {
        let registry = AclRegistry::empty().with_assumed_label("tenant");
        let acl = registry.compose(&roles(&["acme"]), true).unwrap();
        assert_eq!(
            acl.get("tenant").unwrap().filter,
            LabelFilter::equality("tenant", "acme")
        );
    }

    #[test]
    fn test_assumed_roles_disabled_with_empty_registry() {
        let registry = AclRegistry::empty();
        let err = registry.compose(&roles(&["team-a"]), false).unwrap_err();
        assert!(matches!(err, AclError::NoMatchingRoles));
    }
}

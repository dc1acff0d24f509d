//! One-level expansion of an ACL's references.
//!
//! The reference graph between ACLs is potentially cyclic, so nothing here
//! recurses: the reconciler drives closure iteratively and breaks cycles
//! with placeholder port groups.

use std::collections::BTreeSet;

use crate::subject;
use crate::types::AclRecord;

/// Returns the names of ACLs directly referenced by the rules of `acl`.
///
/// Only `ingress.source` and `egress.destination` can carry subjects;
/// reserved aliases, IP forms, address-set and peer references are skipped,
/// and any remaining token is taken as an ACL name. The result is ordered so
/// callers mutate OVN in a deterministic order.
pub fn referenced_acl_names(acl: &AclRecord) -> BTreeSet<String> {
    let mut referenced = BTreeSet::new();

    let mut add_acl_names_from = |subject_list: &str| {
        for token in subject::split_subjects(subject_list) {
            if subject::is_non_acl_subject(token) {
                continue;
            }

            referenced.insert(token.to_string());
        }
    };

    for rule in &acl.ingress {
        add_acl_names_from(&rule.source);
    }

    for rule in &acl.egress {
        add_acl_names_from(&rule.destination);
    }

    referenced
}

/// Returns the address-set names (without the `$` sigil) used anywhere in
/// the rules of `acl`, for pre-fetching set IDs in one batch.
pub fn collect_address_set_names(acl: &AclRecord) -> BTreeSet<String> {
    let mut sets = BTreeSet::new();

    let mut add_sets_from = |subject_list: &str| {
        for token in subject::split_subjects(subject_list) {
            if let Some(name) = token.strip_prefix('$') {
                sets.insert(name.to_string());
            }
        }
    };

    for rule in acl.ingress.iter().chain(acl.egress.iter()) {
        add_sets_from(&rule.source);
        add_sets_from(&rule.destination);
    }

    sets
}

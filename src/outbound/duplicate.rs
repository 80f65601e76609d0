//! Duplicate name resolution

use crate::helper::with_suffix;

/// First of `name`, `stem_1.ext`, `stem_2.ext`, ... not in `existing`
pub fn unique_name<S: AsRef<str>>(existing: &[S], name: &str) -> String {
    let taken = |candidate: &str| existing.iter().any(|e| e.as_ref() == candidate);
    if !taken(name) {
        return name.to_string();
    }
    (1u64..)
        .map(|n| with_suffix(name, &format!("_{n}")))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| name.to_string())
}

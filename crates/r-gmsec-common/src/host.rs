//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Host and process identity used for tracking fields and connection IDs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use once_cell::sync::Lazy;
use sysinfo::System;

static NODE_NAME: Lazy<String> = Lazy::new(|| {
    System::host_name()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_owned())
        .to_ascii_uppercase()
});

/// Upper-cased host name of this node.
pub fn node_name() -> &'static str {
    &NODE_NAME
}

/// Name of the user running the process, upper-cased.
pub fn user_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .map(|name| name.to_ascii_uppercase())
        .unwrap_or_else(|_| "UNKNOWN".to_owned())
}

/// Identifier of the current process.
pub fn process_id() -> u32 {
    std::process::id()
}

/// Operating system description, e.g. `Linux 6.1.0`.
pub fn os_description() -> String {
    match (System::name(), System::os_version()) {
        (Some(name), Some(version)) => format!("{name} {version}"),
        (Some(name), None) => name,
        _ => std::env::consts::OS.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_name_is_uppercase_and_stable() {
        let first = node_name();
        assert!(!first.is_empty());
        assert_eq!(first, first.to_ascii_uppercase());
        assert_eq!(first, node_name());
    }

    #[test]
    fn identity_helpers_return_values() {
        assert_eq!(process_id(), std::process::id());
        assert!(!user_name().is_empty());
        assert!(!os_description().is_empty());
    }
}

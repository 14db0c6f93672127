//! Properties of name sanitizing and file-list ordering over random input.

use proptest::prelude::*;
use transfer::{FileEntry, FileList, sanitize_path};

fn component() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just(".".to_owned()),
        Just("..".to_owned()),
        "[a-z0-9_.-]{1,6}",
    ]
}

fn raw_name() -> impl Strategy<Value = String> {
    (any::<bool>(), prop::collection::vec(component(), 1..6))
        .prop_map(|(absolute, parts)| {
            let joined = parts.join("/");
            if absolute { format!("/{joined}") } else { joined }
        })
}

proptest! {
    #[test]
    fn sanitized_names_stay_below_the_root(name in raw_name()) {
        if let Some(clean) = sanitize_path(&name) {
            prop_assert!(!clean.is_empty());
            prop_assert!(!clean.starts_with('/'));
            prop_assert!(!clean.ends_with('/'));
            for part in clean.split('/') {
                prop_assert!(!part.is_empty());
                prop_assert_ne!(part, ".");
                prop_assert_ne!(part, "..");
            }
            prop_assert_eq!(sanitize_path(&clean), Some(clean.clone()));
        }
    }

    #[test]
    fn names_with_a_parent_step_are_refused(prefix in "[a-z]{1,4}", suffix in "[a-z]{1,4}") {
        let name = format!("{prefix}/../{suffix}");
        prop_assert_eq!(sanitize_path(&name), None);
    }

    #[test]
    fn file_lists_are_sorted_and_unique(names in prop::collection::vec("[a-c]{1,3}(/[a-c]{1,2})?", 0..40)) {
        let entries = names
            .iter()
            .enumerate()
            .map(|(index, name)| FileEntry::new(name.as_str(), index as u64, 0, 0o100_644))
            .collect();
        let list = FileList::from_entries(entries);

        let listed: Vec<&str> = list.iter().map(FileEntry::path).collect();
        for pair in listed.windows(2) {
            prop_assert!(pair[0].as_bytes() < pair[1].as_bytes(), "{:?}", listed);
        }
        let mut expected: Vec<&str> = names.iter().map(String::as_str).collect();
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(listed, expected);

        // the first occurrence of a repeated name wins
        for entry in &list {
            let first = names.iter().position(|name| name == entry.path()).unwrap_or(usize::MAX);
            prop_assert_eq!(entry.len(), first as u64);
        }
    }
}

// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use rand::Rng;

/// Registry-style identifier: `{prefix}_{16 random hex chars}`.
pub fn new_id(prefix: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..16)
        .map(|_| {
            let idx = rng.random_range(0..16u8);
            char::from_digit(u32::from(idx), 16).unwrap_or('0')
        })
        .collect();
    format!("{prefix}_{suffix}")
}

/// Scheduler job names must start with a letter and stay short for qstat tables.
pub fn job_name(process_id: &str) -> String {
    let cleaned: String = process_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let tail: String = cleaned
        .chars()
        .rev()
        .take(9)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("A{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_are_distinct() {
        let a = new_id("TASK");
        let b = new_id("TASK");
        assert!(a.starts_with("TASK_"));
        assert_eq!(a.len(), "TASK_".len() + 16);
        assert_ne!(a, b);
    }

    #[test]
    fn job_names_are_short_and_start_with_letter() {
        let name = job_name("PROCESS_0123456789abcdef");
        assert_eq!(name, "A789abcdef");
        assert_eq!(job_name("p-1"), "Ap1");
    }
}

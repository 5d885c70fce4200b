use crate::domain::models::{SlotStatus, Slots, Stats, TaskEntry, TaskStatus};
use crate::domain::task_codec;
use std::collections::HashMap;

/// Container status of one slot: uniform entries keep their status,
/// anything else is `Mixed`. A slot without entries is `Initial`.
pub fn slot_status(entries: &[TaskEntry]) -> SlotStatus {
    let Some(first) = entries.first() else {
        return SlotStatus::Initial;
    };
    if entries.iter().any(|entry| entry.status != first.status) {
        return SlotStatus::Mixed;
    }
    match first.status {
        TaskStatus::Initial => SlotStatus::Initial,
        TaskStatus::Completed => SlotStatus::Completed,
        TaskStatus::Failed => SlotStatus::Failed,
    }
}

// completed > failed > initial, independent of slot order
fn priority(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Initial => 0,
        TaskStatus::Failed => 1,
        TaskStatus::Completed => 2,
    }
}

fn fold_status(current: TaskStatus, occurrence: TaskStatus) -> TaskStatus {
    if priority(occurrence) > priority(current) {
        occurrence
    } else {
        current
    }
}

/// Resolves every distinct task content of the day to a single status.
pub fn resolve_statuses(slots: &Slots) -> HashMap<String, TaskStatus> {
    let mut resolved: HashMap<String, TaskStatus> = HashMap::new();
    for slot in slots.iter().flatten() {
        for entry in task_codec::decode(&slot.task_text) {
            resolved
                .entry(entry.content)
                .and_modify(|current| *current = fold_status(*current, entry.status))
                .or_insert(entry.status);
        }
    }
    resolved
}

pub fn calculate_stats(slots: &Slots) -> Stats {
    let resolved = resolve_statuses(slots);
    let mut stats = Stats {
        total: resolved.len() as u32,
        ..Stats::default()
    };
    for status in resolved.values() {
        match status {
            TaskStatus::Completed => stats.completed += 1,
            TaskStatus::Failed => stats.failed += 1,
            TaskStatus::Initial => stats.pending += 1,
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Settings, TimeSlot};
    use crate::domain::slot_grid;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn slot(label: &str, task_text: &str) -> TimeSlot {
        TimeSlot {
            id: label.to_string(),
            label: label.to_string(),
            task_text: task_text.to_string(),
        }
    }

    #[test]
    fn slot_status_of_empty_slot_is_initial() {
        assert_eq!(slot_status(&[]), SlotStatus::Initial);
    }

    #[test]
    fn slot_status_reports_uniform_and_mixed() {
        let done = TaskEntry::with_status("a", TaskStatus::Completed);
        let failed = TaskEntry::with_status("b", TaskStatus::Failed);
        let open = TaskEntry::new("c");

        assert_eq!(slot_status(&[done.clone(), done.clone()]), SlotStatus::Completed);
        assert_eq!(slot_status(std::slice::from_ref(&failed)), SlotStatus::Failed);
        assert_eq!(slot_status(std::slice::from_ref(&open)), SlotStatus::Initial);
        assert_eq!(slot_status(&[done, open]), SlotStatus::Mixed);
    }

    #[test]
    fn empty_day_has_zero_stats() {
        let slots = slot_grid::generate(&Settings {
            start_hour: 7,
            end_hour: 8,
            segments_per_hour: 2,
        });
        assert_eq!(calculate_stats(&slots), Stats::default());
    }

    #[test]
    fn duplicate_content_counts_once_and_completed_dominates() {
        let slots = vec![vec![
            slot("7:00 - 7:30", "Write report [STATUS:initial]"),
            slot("7:30 - 8:00", "Write report [STATUS:completed]"),
        ]];
        assert_eq!(
            calculate_stats(&slots),
            Stats {
                total: 1,
                completed: 1,
                failed: 0,
                pending: 0,
            }
        );
    }

    #[test]
    fn failed_outranks_initial_in_either_order() {
        let forward = vec![vec![
            slot("a", "Gym [STATUS:failed]"),
            slot("b", "Gym"),
        ]];
        let backward = vec![vec![
            slot("a", "Gym"),
            slot("b", "Gym [STATUS:failed]"),
        ]];

        let expected = Stats {
            total: 1,
            completed: 0,
            failed: 1,
            pending: 0,
        };
        assert_eq!(calculate_stats(&forward), expected);
        assert_eq!(calculate_stats(&backward), expected);
    }

    #[test]
    fn completed_survives_later_failure() {
        let slots = vec![
            vec![slot("a", "Read [STATUS:completed]")],
            vec![slot("b", "Read [STATUS:failed]\nWrite [STATUS:failed]\nPlan")],
        ];
        let stats = calculate_stats(&slots);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
    }

    fn line_strategy() -> impl Strategy<Value = String> {
        (
            prop_oneof![Just("Read"), Just("Write"), Just("Gym"), Just("Call client")],
            prop_oneof![
                Just(""),
                Just(" [STATUS:initial]"),
                Just(" [STATUS:completed]"),
                Just(" [STATUS:failed]"),
            ],
        )
            .prop_map(|(content, marker)| format!("{content}{marker}"))
    }

    fn slots_strategy() -> impl Strategy<Value = Slots> {
        proptest::collection::vec(
            proptest::collection::vec(
                proptest::collection::vec(line_strategy(), 0..4)
                    .prop_map(|lines| slot("x", &lines.join("\n"))),
                1..4,
            ),
            0..5,
        )
    }

    // Property: totals add up and count distinct contents
    proptest! {
        #[test]
        fn stats_total_counts_distinct_contents(slots in slots_strategy()) {
            let stats = calculate_stats(&slots);
            let distinct = slots
                .iter()
                .flatten()
                .flat_map(|slot| task_codec::decode(&slot.task_text))
                .map(|entry| entry.content)
                .collect::<HashSet<_>>();

            prop_assert!(stats.is_consistent());
            prop_assert_eq!(stats.total as usize, distinct.len());
        }
    }
}

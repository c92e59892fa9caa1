use crate::log_debug;
use crate::types::{RawScheduleGroup, ScheduleGroup, ScheduleMode, TaskRef};

/// Bind the plan's declared schedule groups to the tasks actually created.
///
/// This is a best-effort projection and never fails:
/// - Titles are compared after trimming, collapsing whitespace and lowercasing.
/// - Matching walks forward in creation order from the previous match, then
///   wraps around, and never binds one created task twice. Duplicate titles
///   therefore resolve to successive tasks.
/// - A declared title with no created task (creation failed upstream) is dropped.
/// - A group left with no tasks is removed, so the schedule cannot wait on a
///   task that does not exist.
pub fn build_schedule(raw_groups: &[RawScheduleGroup], created: &[TaskRef]) -> Vec<ScheduleGroup> {
    let normalized: Vec<String> = created.iter().map(|t| normalize_title(&t.title)).collect();
    let mut claimed = vec![false; created.len()];
    let mut search_from = 0usize;
    let mut groups = Vec::new();

    for (group_index, raw) in raw_groups.iter().enumerate() {
        let mut tasks = Vec::new();

        for title in &raw.tasks {
            match claim_match(title, &normalized, &mut claimed, search_from) {
                Some(idx) => {
                    search_from = idx + 1;
                    tasks.push(created[idx].clone());
                }
                None => {
                    log_debug!(
                        "[schedule] group {}: no created task matches '{}', dropping",
                        group_index + 1,
                        title
                    );
                }
            }
        }

        if tasks.is_empty() {
            log_debug!(
                "[schedule] group {} resolved to no tasks, removing",
                group_index + 1
            );
            continue;
        }

        groups.push(ScheduleGroup {
            tasks,
            mode: if raw.parallel {
                ScheduleMode::Parallel
            } else {
                ScheduleMode::Sequential
            },
        });
    }

    groups
}

/// Schedule used when the plan declares none: every created task, one at a time.
pub fn default_schedule(created: &[TaskRef]) -> Vec<ScheduleGroup> {
    if created.is_empty() {
        return Vec::new();
    }
    vec![ScheduleGroup {
        tasks: created.to_vec(),
        mode: ScheduleMode::Sequential,
    }]
}

fn claim_match(
    title: &str,
    normalized: &[String],
    claimed: &mut [bool],
    search_from: usize,
) -> Option<usize> {
    let wanted = normalize_title(title);
    if wanted.is_empty() {
        return None;
    }

    let len = normalized.len();
    let start = search_from.min(len);
    let found = (start..len)
        .chain(0..start)
        .find(|&idx| !claimed[idx] && normalized[idx] == wanted)?;

    claimed[found] = true;
    Some(found)
}

fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Picks which candidate a logical operation should try first. Pure function
/// of the per-client request counter, so a fixed counter and candidate list
/// always land on the same replica.
///
/// Writes and forced-primary calls always start at index 0 (the primary,
/// which leads the directory's candidate list).
pub(crate) fn striped_start_index(
    counter: u64,
    candidate_count: usize,
    is_read: bool,
    force_primary: bool,
    striping_enabled: bool,
) -> usize {
    if candidate_count == 0 {
        return 0;
    }
    if force_primary || !striping_enabled || !is_read {
        return 0;
    }
    (counter % candidate_count as u64) as usize
}

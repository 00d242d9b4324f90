use nftlb_controller_core::FarmName;
use std::collections::BTreeSet;

/// A backend that must be deleted explicitly from a farm.
pub type Removal = (FarmName, String);

/// Computes the backend deletions implied by an endpoints update.
///
/// The load balancer does not infer removals from a declaration, so every
/// backend that left the set is deleted under every farm the object feeds.
/// When the object loses all of its backends, a diff against the (empty)
/// current farm list is meaningless, so everything that existed is deleted
/// under the previously known farms instead.
pub fn removals(
    previous: &BTreeSet<String>,
    current: &BTreeSet<String>,
    previous_farms: &[FarmName],
    current_farms: &[FarmName],
) -> Vec<Removal> {
    if current.is_empty() {
        return previous
            .iter()
            .flat_map(|backend| {
                previous_farms
                    .iter()
                    .map(move |farm| (farm.clone(), backend.clone()))
            })
            .collect();
    }

    previous
        .difference(current)
        .flat_map(|backend| {
            current_farms
                .iter()
                .map(move |farm| (farm.clone(), backend.clone()))
        })
        .collect()
}

// ── Change-group bookkeeping ──
//
// Local membership is the source of truth. Every mutation applies here
// first; the session then mirrors it to every connected link, and replays
// the full membership when a link reconnects. The core only ever polls
// groups that exist in this model.

use indexmap::{IndexMap, IndexSet};
use serde_json::{Value, json};

/// Group the session seeds with the configured monitored controls.
pub const DEFAULT_GROUP: &str = "corelink";

#[derive(Debug, Default)]
struct Group {
    controls: IndexSet<String>,
    /// Component name → member control names, insertion-ordered.
    component_controls: IndexMap<String, IndexSet<String>>,
    /// Set by `invalidate`: the next poll result is ingested with forced
    /// emission so every consumer resynchronizes.
    force_resync: bool,
}

impl Group {
    fn is_empty(&self) -> bool {
        self.controls.is_empty() && self.component_controls.is_empty()
    }
}

/// The set of change groups for one session.
#[derive(Debug, Default)]
pub(crate) struct ChangeGroups {
    groups: IndexMap<String, Group>,
}

impl ChangeGroups {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add named controls, creating the group on first reference.
    pub(crate) fn add_controls(&mut self, group: &str, names: &[String]) {
        let entry = self.groups.entry(group.to_owned()).or_default();
        for name in names {
            entry.controls.insert(name.clone());
        }
    }

    /// Add component controls, creating the group on first reference.
    pub(crate) fn add_component_controls(&mut self, group: &str, component: &str, names: &[String]) {
        let entry = self.groups.entry(group.to_owned()).or_default();
        let members = entry.component_controls.entry(component.to_owned()).or_default();
        for name in names {
            members.insert(name.clone());
        }
    }

    /// Remove named controls. Returns `false` when the group is unknown.
    pub(crate) fn remove_controls(&mut self, group: &str, names: &[String]) -> bool {
        let Some(entry) = self.groups.get_mut(group) else { return false };
        for name in names {
            entry.controls.shift_remove(name);
        }
        true
    }

    /// Drop the group entirely. Returns `false` when it was unknown.
    pub(crate) fn destroy(&mut self, group: &str) -> bool {
        self.groups.shift_remove(group).is_some()
    }

    /// Empty the group but keep it alive. Returns `false` when unknown.
    pub(crate) fn clear(&mut self, group: &str) -> bool {
        let Some(entry) = self.groups.get_mut(group) else { return false };
        entry.controls.clear();
        entry.component_controls.clear();
        true
    }

    /// Mark the group for forced resynchronization on its next poll
    /// result. Returns `false` when the group is unknown.
    pub(crate) fn invalidate(&mut self, group: &str) -> bool {
        let Some(entry) = self.groups.get_mut(group) else { return false };
        entry.force_resync = true;
        true
    }

    /// Read and clear the forced-resync flag for a group.
    pub(crate) fn take_force_resync(&mut self, group: &str) -> bool {
        self.groups
            .get_mut(group)
            .is_some_and(|entry| std::mem::take(&mut entry.force_resync))
    }

    pub(crate) fn contains(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// Ids of every group worth polling. An idle group that never received
    /// membership is not polled.
    pub(crate) fn poll_targets(&self) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(_, group)| !group.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Requests reproducing the full current membership on a link that
    /// just (re)connected. Byte-for-byte the same membership the local
    /// model holds at this moment.
    pub(crate) fn replay_requests(&self) -> Vec<(&'static str, Value)> {
        let mut requests = Vec::new();
        for (id, group) in &self.groups {
            if !group.controls.is_empty() {
                let names: Vec<String> = group.controls.iter().cloned().collect();
                requests.push(add_controls_request(id, &names));
            }
            for (component, members) in &group.component_controls {
                let names: Vec<String> = members.iter().cloned().collect();
                requests.push(add_component_controls_request(id, component, &names));
            }
        }
        requests
    }

    /// Membership snapshot for one group: named controls plus
    /// component-control pairs, in insertion order.
    #[cfg(test)]
    pub(crate) fn membership(&self, group: &str) -> Option<(Vec<String>, Vec<(String, Vec<String>)>)> {
        let entry = self.groups.get(group)?;
        Some((
            entry.controls.iter().cloned().collect(),
            entry
                .component_controls
                .iter()
                .map(|(c, members)| (c.clone(), members.iter().cloned().collect()))
                .collect(),
        ))
    }
}

// ── Wire request builders ────────────────────────────────────────────
//
// Shared by delta mirroring and replay so both paths produce identical
// membership on the core.

pub(crate) fn add_controls_request(group: &str, names: &[String]) -> (&'static str, Value) {
    ("ChangeGroup.AddControl", json!({"Id": group, "Controls": names}))
}

pub(crate) fn add_component_controls_request(
    group: &str,
    component: &str,
    names: &[String],
) -> (&'static str, Value) {
    let controls: Vec<Value> = names.iter().map(|name| json!({"Name": name})).collect();
    (
        "ChangeGroup.AddComponentControl",
        json!({"Id": group, "Component": {"Name": component, "Controls": controls}}),
    )
}

pub(crate) fn remove_controls_request(group: &str, names: &[String]) -> (&'static str, Value) {
    ("ChangeGroup.Remove", json!({"Id": group, "Controls": names}))
}

pub(crate) fn destroy_request(group: &str) -> (&'static str, Value) {
    ("ChangeGroup.Destroy", json!({"Id": group}))
}

pub(crate) fn clear_request(group: &str) -> (&'static str, Value) {
    ("ChangeGroup.Clear", json!({"Id": group}))
}

pub(crate) fn invalidate_request(group: &str) -> (&'static str, Value) {
    ("ChangeGroup.Invalidate", json!({"Id": group}))
}

pub(crate) fn poll_request(group: &str) -> (&'static str, Value) {
    ("ChangeGroup.Poll", json!({"Id": group}))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn groups_are_created_on_first_reference() {
        let mut groups = ChangeGroups::new();
        assert!(!groups.contains("g1"));

        groups.add_controls("g1", &names(&["Gain1"]));
        assert!(groups.contains("g1"));
        assert_eq!(groups.poll_targets(), vec!["g1"]);
    }

    #[test]
    fn empty_groups_are_not_polled() {
        let mut groups = ChangeGroups::new();
        groups.add_controls("g1", &[]);
        assert!(groups.contains("g1"));
        assert!(groups.poll_targets().is_empty());

        groups.add_controls("g1", &names(&["Gain1"]));
        assert_eq!(groups.poll_targets(), vec!["g1"]);

        groups.clear("g1");
        assert!(groups.poll_targets().is_empty());
    }

    #[test]
    fn membership_deduplicates_and_keeps_order() {
        let mut groups = ChangeGroups::new();
        groups.add_controls("g1", &names(&["b", "a"]));
        groups.add_controls("g1", &names(&["a", "c"]));

        let (controls, components) = groups.membership("g1").unwrap();
        assert_eq!(controls, names(&["b", "a", "c"]));
        assert!(components.is_empty());
    }

    #[test]
    fn replay_reproduces_current_membership() {
        let mut groups = ChangeGroups::new();
        groups.add_controls("g1", &names(&["Gain1", "Gain2"]));
        groups.add_component_controls("g1", "Room Combiner", &names(&["wall.1.open"]));
        groups.remove_controls("g1", &names(&["Gain2"]));

        let requests = groups.replay_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].0, "ChangeGroup.AddControl");
        assert_eq!(requests[0].1, json!({"Id": "g1", "Controls": ["Gain1"]}));
        assert_eq!(requests[1].0, "ChangeGroup.AddComponentControl");
        assert_eq!(
            requests[1].1,
            json!({"Id": "g1", "Component": {"Name": "Room Combiner", "Controls": [{"Name": "wall.1.open"}]}})
        );
    }

    #[test]
    fn replay_is_stable_across_repeated_mutations() {
        // Membership changed several times while a link was down: replay
        // must reflect only the final state.
        let mut groups = ChangeGroups::new();
        groups.add_controls("g1", &names(&["a"]));
        groups.add_controls("g1", &names(&["b", "c"]));
        groups.remove_controls("g1", &names(&["a", "c"]));
        groups.add_controls("g1", &names(&["d"]));

        let requests = groups.replay_requests();
        assert_eq!(requests[0].1, json!({"Id": "g1", "Controls": ["b", "d"]}));
    }

    #[test]
    fn unknown_group_operations_report_failure() {
        let mut groups = ChangeGroups::new();
        assert!(!groups.remove_controls("nope", &names(&["x"])));
        assert!(!groups.destroy("nope"));
        assert!(!groups.clear("nope"));
        assert!(!groups.invalidate("nope"));
    }

    #[test]
    fn destroy_removes_the_group() {
        let mut groups = ChangeGroups::new();
        groups.add_controls("g1", &names(&["Gain1"]));
        assert!(groups.destroy("g1"));
        assert!(!groups.contains("g1"));
        assert!(groups.replay_requests().is_empty());
    }

    #[test]
    fn invalidate_flag_reads_once() {
        let mut groups = ChangeGroups::new();
        groups.add_controls("g1", &names(&["Gain1"]));

        assert!(!groups.take_force_resync("g1"));
        groups.invalidate("g1");
        assert!(groups.take_force_resync("g1"));
        assert!(!groups.take_force_resync("g1"));
    }
}

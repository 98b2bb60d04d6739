//! Structural diff of two topologies
//!
//! [`diff_topology`] turns an (old, new) pair of topologies into a flat list of
//! per-field [`Change`]s tagged with their position in the tree.
//! [`has_change`] answers questions such as "was a rack created inside a
//! datacenter that itself did not change" over that list.

use std::collections::BTreeMap;
use std::fmt;

use cassandra_common::crd::{Datacenter, Rack, Topology};

/// Operation recorded for a field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// The field appeared
    Create,
    /// The field changed value
    Update,
    /// The field disappeared
    Delete,
}

/// Field of a datacenter or rack
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    /// `name`
    Name,
    /// `nodesPerRacks`
    NodesPerRacks,
    /// `numTokens` (datacenters only)
    NumTokens,
    /// `labels`
    Labels,
}

/// Position of a change: datacenter index, optional rack index, field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangePath {
    /// Index of the datacenter
    pub dc: usize,
    /// Index of the rack, for rack-level fields
    pub rack: Option<usize>,
    /// Changed field
    pub field: Field,
}

impl ChangePath {
    fn dc_field(dc: usize, field: Field) -> Self {
        Self {
            dc,
            rack: None,
            field,
        }
    }

    fn rack_field(dc: usize, rack: usize, field: Field) -> Self {
        Self {
            dc,
            rack: Some(rack),
            field,
        }
    }

    /// Identity-bearing fields: datacenter name and token count, rack name.
    /// Node counts and labels never count.
    pub fn is_significant(&self) -> bool {
        matches!(
            (self.rack, self.field),
            (None, Field::Name | Field::NumTokens) | (Some(_), Field::Name)
        )
    }
}

impl fmt::Display for ChangePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rack {
            Some(rack) => write!(f, "DC.{}.Rack.{}.{:?}", self.dc, rack, self.field),
            None => write!(f, "DC.{}.{:?}", self.dc, self.field),
        }
    }
}

/// One changed field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Change {
    /// Operation
    pub kind: ChangeKind,
    /// Where it happened
    pub path: ChangePath,
}

/// Ordered list of changes
pub type Changelog = Vec<Change>;

/// Diff two topologies field by field.
///
/// Datacenters (and racks inside a paired datacenter) that are deep-equal to
/// an element of the other side are unchanged wherever they sit. What is left
/// is paired by index: pairs are compared field by field, unpaired old
/// elements produce `Delete` for each of their fields and unpaired new
/// elements `Create`.
pub fn diff_topology(old: &Topology, new: &Topology) -> Changelog {
    let mut log = Changelog::new();
    diff_slice(&old.dc, &new.dc, |i, a, b| diff_dc(&mut log, i, a, b));
    log
}

fn diff_slice<'a, T: PartialEq>(
    old: &'a [T],
    new: &'a [T],
    mut on_pair: impl FnMut(usize, Option<&'a T>, Option<&'a T>),
) {
    let mut pairs: BTreeMap<usize, (Option<&T>, Option<&T>)> = BTreeMap::new();
    for i in unmatched(old, new) {
        pairs.entry(i).or_default().0 = Some(&old[i]);
    }
    for i in unmatched(new, old) {
        pairs.entry(i).or_default().1 = Some(&new[i]);
    }
    for (i, (a, b)) in pairs {
        on_pair(i, a, b);
    }
}

/// Indices of `from` with no equal element left in `other`; each element of
/// `other` matches at most once.
fn unmatched<T: PartialEq>(from: &[T], other: &[T]) -> Vec<usize> {
    let mut used = vec![false; other.len()];
    from.iter()
        .enumerate()
        .filter_map(|(i, item)| {
            match (0..other.len()).find(|&j| !used[j] && other[j] == *item) {
                Some(j) => {
                    used[j] = true;
                    None
                }
                None => Some(i),
            }
        })
        .collect()
}

fn diff_dc(log: &mut Changelog, i: usize, old: Option<&Datacenter>, new: Option<&Datacenter>) {
    push_diff(
        log,
        ChangePath::dc_field(i, Field::Name),
        old.map(|d| &d.name),
        new.map(|d| &d.name),
    );
    push_diff(
        log,
        ChangePath::dc_field(i, Field::NodesPerRacks),
        old.and_then(|d| d.nodes_per_racks.as_ref()),
        new.and_then(|d| d.nodes_per_racks.as_ref()),
    );
    // setting or clearing the token count of a kept datacenter edits it in place
    let tokens = |d: Option<&Datacenter>| d.map(|d| d.num_tokens);
    push_diff(
        log,
        ChangePath::dc_field(i, Field::NumTokens),
        tokens(old),
        tokens(new),
    );
    push_diff(
        log,
        ChangePath::dc_field(i, Field::Labels),
        old.and_then(|d| non_empty(&d.labels)),
        new.and_then(|d| non_empty(&d.labels)),
    );
    match (old, new) {
        (Some(a), Some(b)) => {
            diff_slice(&a.rack, &b.rack, |j, ra, rb| diff_rack(log, i, j, ra, rb))
        }
        (Some(a), None) => {
            for (j, rack) in a.rack.iter().enumerate() {
                diff_rack(log, i, j, Some(rack), None);
            }
        }
        (None, Some(b)) => {
            for (j, rack) in b.rack.iter().enumerate() {
                diff_rack(log, i, j, None, Some(rack));
            }
        }
        (None, None) => {}
    }
}

fn diff_rack(log: &mut Changelog, dc: usize, j: usize, old: Option<&Rack>, new: Option<&Rack>) {
    push_diff(
        log,
        ChangePath::rack_field(dc, j, Field::Name),
        old.map(|r| &r.name),
        new.map(|r| &r.name),
    );
    push_diff(
        log,
        ChangePath::rack_field(dc, j, Field::NodesPerRacks),
        old.and_then(|r| r.nodes_per_racks.as_ref()),
        new.and_then(|r| r.nodes_per_racks.as_ref()),
    );
    push_diff(
        log,
        ChangePath::rack_field(dc, j, Field::Labels),
        old.and_then(|r| non_empty(&r.labels)),
        new.and_then(|r| non_empty(&r.labels)),
    );
}

fn non_empty<K, V>(map: &BTreeMap<K, V>) -> Option<&BTreeMap<K, V>> {
    (!map.is_empty()).then_some(map)
}

fn push_diff<T: PartialEq>(log: &mut Changelog, path: ChangePath, old: Option<T>, new: Option<T>) {
    let kind = match (old, new) {
        (None, Some(_)) => ChangeKind::Create,
        (Some(_), None) => ChangeKind::Delete,
        (Some(a), Some(b)) if a != b => ChangeKind::Update,
        _ => return,
    };
    log.push(Change { kind, path });
}

/// Level a path pattern addresses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Level {
    Dc,
    Rack,
}

/// A parsed `DC` / `DC.Rack` pattern, optionally negated with a leading `-`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PathFilter {
    negated: bool,
    /// `None` for a pattern that addresses nothing
    level: Option<Level>,
}

impl PathFilter {
    fn parse(pattern: &str) -> Self {
        let (negated, body) = match pattern.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, pattern),
        };
        let level = match body.split('.').collect::<Vec<_>>().as_slice() {
            ["DC"] => Some(Level::Dc),
            ["DC", "Rack"] => Some(Level::Rack),
            _ => None,
        };
        Self { negated, level }
    }

    fn matches(&self, path: &ChangePath) -> bool {
        match self.level {
            Some(Level::Dc) => path.rack.is_none(),
            Some(Level::Rack) => path.rack.is_some(),
            None => false,
        }
    }
}

/// Whether the changelog holds a significant change of `kind` matching the
/// patterns.
///
/// Patterns are `"DC"` or `"DC.Rack"`, a leading `-` excludes. Changes are
/// grouped by datacenter index; the answer is true when some group contains
/// a match for every include pattern and none for any exclude pattern. With
/// no pattern, any significant change of `kind` qualifies.
pub fn has_change(changelog: &[Change], kind: ChangeKind, patterns: &[&str]) -> bool {
    let mut groups: BTreeMap<usize, Vec<&ChangePath>> = BTreeMap::new();
    for change in changelog
        .iter()
        .filter(|c| c.kind == kind && c.path.is_significant())
    {
        groups.entry(change.path.dc).or_default().push(&change.path);
    }
    if patterns.is_empty() {
        return !groups.is_empty();
    }

    let (exclude, include): (Vec<PathFilter>, Vec<PathFilter>) = patterns
        .iter()
        .map(|p| PathFilter::parse(p))
        .partition(|f| f.negated);

    groups.values().any(|paths| {
        include
            .iter()
            .all(|f| paths.iter().any(|path| f.matches(path)))
            && !exclude
                .iter()
                .any(|f| paths.iter().any(|path| f.matches(path)))
    })
}

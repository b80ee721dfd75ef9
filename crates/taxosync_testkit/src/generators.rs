//! Property-based test generators using proptest.
//!
//! Snapshots are drawn from a small shared identity space (`N0..`, `T0..`,
//! `S0..`, `D0..`), so two independently generated snapshots of a dataset
//! overlap and their diff exercises every change group. Generated
//! snapshots are always referentially complete and acyclic, and carry
//! every value tag: years and flags on taxa, publication dates on names,
//! vernacular name sets, and decimal coordinates on distributions.

use chrono::NaiveDate;
use proptest::prelude::*;
use taxosync_model::{DatasetId, Record, RecordKey, RecordKind, RevisionId, Snapshot, Value};

const NAMES: usize = 3;
const TAXA: usize = 8;
const SYNONYMS: usize = 4;
const DISTRIBUTIONS: usize = 4;

const RANKS: [&str; 3] = ["species", "genus", "family"];
const STATUSES: [&str; 2] = ["accepted", "doubtful"];
const AREAS: [&str; 4] = ["TZ", "DE", "FR", "BR"];
const VERNACULARS: [&str; 4] = ["fir", "spruce", "umbrella thorn", "wattle"];

// days from CE, roughly 1747 to 2027
const PUBLISHED: std::ops::Range<i32> = 638_000..740_000;

#[derive(Debug, Clone)]
struct NameSlot {
    rank: usize,
    published: Option<i32>,
}

#[derive(Debug, Clone)]
struct TaxonSlot {
    present: bool,
    parent: Option<usize>,
    name: usize,
    status: usize,
    year: Option<i64>,
    extinct: Option<bool>,
    vernacular: Vec<usize>,
}

#[derive(Debug, Clone)]
struct LinkSlot {
    present: bool,
    target: usize,
    choice: usize,
    latitude: Option<f64>,
    elevations: Vec<f64>,
}

/// Strategy for finite decimals of any magnitude, both signs.
pub fn finite_decimal() -> impl Strategy<Value = f64> {
    prop::num::f64::NORMAL | prop::num::f64::SUBNORMAL | prop::num::f64::ZERO
}

fn name_slot() -> impl Strategy<Value = NameSlot> {
    (0..RANKS.len(), prop::option::of(PUBLISHED))
        .prop_map(|(rank, published)| NameSlot { rank, published })
}

fn taxon_slot() -> impl Strategy<Value = TaxonSlot> {
    (
        any::<bool>(),
        prop::option::of(0..TAXA),
        0..NAMES,
        0..STATUSES.len(),
        prop::option::of(1753i64..2030),
        prop::option::of(any::<bool>()),
        prop::collection::vec(0..VERNACULARS.len(), 0..3),
    )
        .prop_map(
            |(present, parent, name, status, year, extinct, vernacular)| TaxonSlot {
                present,
                parent,
                name,
                status,
                year,
                extinct,
                vernacular,
            },
        )
}

fn link_slot() -> impl Strategy<Value = LinkSlot> {
    (
        any::<bool>(),
        0..TAXA,
        0..AREAS.len(),
        prop::option::of(finite_decimal()),
        prop::collection::vec(finite_decimal(), 0..3),
    )
        .prop_map(|(present, target, choice, latitude, elevations)| LinkSlot {
            present,
            target,
            choice,
            latitude,
            elevations,
        })
}

/// Strategy for valid snapshots of a dataset revision.
pub fn snapshot_strategy(dataset: DatasetId, revision: u64) -> impl Strategy<Value = Snapshot> {
    (
        prop::collection::vec(name_slot(), NAMES),
        prop::collection::vec(taxon_slot(), TAXA),
        prop::collection::vec(link_slot(), SYNONYMS),
        prop::collection::vec(link_slot(), DISTRIBUTIONS),
    )
        .prop_map(move |(names, taxa, synonyms, distributions)| {
            build(dataset, revision, &names, &taxa, &synonyms, &distributions)
        })
}

/// Strategy for a previous/next pair of snapshots of the same dataset.
pub fn snapshot_pair_strategy(dataset: DatasetId) -> impl Strategy<Value = (Snapshot, Snapshot)> {
    (snapshot_strategy(dataset, 1), snapshot_strategy(dataset, 2))
}

fn build(
    dataset: DatasetId,
    revision: u64,
    names: &[NameSlot],
    taxa: &[TaxonSlot],
    synonyms: &[LinkSlot],
    distributions: &[LinkSlot],
) -> Snapshot {
    let mut records = Vec::new();

    for (i, slot) in names.iter().enumerate() {
        let mut record = Record::new(dataset, RecordKind::Name, format!("N{i}"))
            .with_field("scientificName", format!("Name {i}"))
            .with_field("rank", RANKS[slot.rank]);
        if let Some(days) = slot.published {
            let date = NaiveDate::from_num_days_from_ce_opt(days).expect("date in range");
            record = record.with_field("published", date);
        }
        records.push(record);
    }

    // parents only point at lower slots, so the hierarchy is acyclic
    let mut present: Vec<usize> = Vec::new();
    for (i, slot) in taxa.iter().enumerate() {
        if !slot.present {
            continue;
        }
        let mut record = Record::new(dataset, RecordKind::Taxon, format!("T{i}"))
            .with_ref("name", RecordKey::name(format!("N{}", slot.name)))
            .with_field("status", STATUSES[slot.status]);
        record = match slot.parent {
            Some(pick) if !present.is_empty() => {
                let parent = present[pick % present.len()];
                record.with_ref("parent", RecordKey::taxon(format!("T{parent}")))
            }
            _ => record.with_null("parent"),
        };
        if let Some(year) = slot.year {
            record = record.with_field("year", year);
        }
        if let Some(extinct) = slot.extinct {
            record = record.with_field("extinct", extinct);
        }
        if !slot.vernacular.is_empty() {
            let vernacular = slot.vernacular.iter().map(|&v| Value::text(VERNACULARS[v]));
            record = record.with_field("vernacular", Value::set(vernacular));
        }
        records.push(record);
        present.push(i);
    }

    if !present.is_empty() {
        for (i, slot) in synonyms.iter().enumerate().filter(|(_, s)| s.present) {
            let accepted = present[slot.target % present.len()];
            records.push(
                Record::new(dataset, RecordKind::Synonym, format!("S{i}"))
                    .with_ref("name", RecordKey::name(format!("N{}", slot.choice % NAMES)))
                    .with_ref("accepted", RecordKey::taxon(format!("T{accepted}"))),
            );
        }
        for (i, slot) in distributions.iter().enumerate().filter(|(_, s)| s.present) {
            let taxon = present[slot.target % present.len()];
            let mut record = Record::new(dataset, RecordKind::Distribution, format!("D{i}"))
                .with_ref("taxon", RecordKey::taxon(format!("T{taxon}")))
                .with_field("area", AREAS[slot.choice]);
            if let Some(latitude) = slot.latitude {
                record = record.with_field("latitude", Value::Decimal(latitude));
            }
            if !slot.elevations.is_empty() {
                let elevations = slot.elevations.iter().map(|&e| Value::Decimal(e));
                record = record.with_field("elevations", Value::set(elevations));
            }
            records.push(record);
        }
    }

    Snapshot::new(dataset, RevisionId::new(revision), records)
        .expect("generated snapshot must be valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_snapshots_are_complete(s in snapshot_strategy(DatasetId::new(1), 1)) {
            prop_assert!(s.dangling_references().is_empty());
            prop_assert_eq!(s.count_by_kind().names, NAMES as u64);
        }
    }
}

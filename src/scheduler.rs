//! Allocation-driven ingestion loop.
//!
//! Each iteration refreshes counts from the catalog, picks the subcategory
//! furthest from its target, issues exactly one search call for it and runs
//! every returned photo through the [`ImageProcessor`].

use std::collections::HashMap;
use std::fmt;
use std::thread;

use anyhow::Result;
use serde::Serialize;

use crate::allocation::{AllocationPlan, DomainAllocation, SubcategoryTarget};
use crate::catalog::CatalogStore;
use crate::controls::IngestControls;
use crate::model::SubcategoryCount;
use crate::processor::{ImageProcessor, IngestOutcome, SkipSink};
use crate::random::RandomSource;
use crate::search::{Orientation, PhotoSearch, SearchQuery};

/// Subcategory chosen for the next search call.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'p> {
    /// Owning domain.
    pub domain: &'p DomainAllocation,
    /// Chosen subcategory.
    pub subcategory: &'p SubcategoryTarget,
    /// Images stored so far.
    pub current: u64,
    /// `(target - current) / target`.
    pub priority: f64,
}

/// Stored image counts keyed by (domain, subcategory).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountTable {
    counts: HashMap<(String, String), u64>,
}

impl CountTable {
    /// Builds a table from catalog rows.
    pub fn from_counts(rows: Vec<SubcategoryCount>) -> Self {
        let counts = rows
            .into_iter()
            .map(|row| ((row.domain, row.subcategory), row.count))
            .collect();
        Self { counts }
    }

    /// Count for one pair, zero when absent.
    pub fn get(&self, domain: &str, subcategory: &str) -> u64 {
        self.counts
            .get(&(domain.to_string(), subcategory.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Sets the count for one pair.
    pub fn set(&mut self, domain: &str, subcategory: &str, count: u64) {
        self.counts
            .insert((domain.to_string(), subcategory.to_string()), count);
    }

    /// Adds one stored image to a pair.
    pub fn increment(&mut self, domain: &str, subcategory: &str) {
        *self
            .counts
            .entry((domain.to_string(), subcategory.to_string()))
            .or_default() += 1;
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// The global stored-image target was reached.
    TargetReached,
    /// Every subcategory met its target.
    AllocationsFilled,
    /// The configured iteration cap was hit.
    IterationLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::TargetReached => write!(f, "global target reached"),
            StopReason::AllocationsFilled => write!(f, "all allocations fulfilled"),
            StopReason::IterationLimit => write!(f, "iteration limit reached"),
        }
    }
}

/// Totals for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Scheduling iterations that issued a search.
    pub iterations: u64,
    /// Search calls issued.
    pub searches: u64,
    /// Images stored.
    pub stored: u64,
    /// Candidates skipped.
    pub skipped: u64,
    /// Catalog total when the run ended.
    pub total_images: u64,
    /// Why the run ended.
    pub stop: StopReason,
}

/// Chooses what to fetch next and drives the ingest loop.
pub struct IngestScheduler<'p> {
    plan: &'p AllocationPlan,
    controls: IngestControls,
}

impl<'p> IngestScheduler<'p> {
    /// Scheduler over `plan`.
    pub fn new(plan: &'p AllocationPlan, controls: IngestControls) -> Self {
        Self { plan, controls }
    }

    /// Active controls.
    pub fn controls(&self) -> &IngestControls {
        &self.controls
    }

    /// Subcategory with the largest unmet-need ratio, earliest in plan order on ties.
    pub fn select_next(&self, counts: &CountTable) -> Option<Selection<'p>> {
        let mut best: Option<Selection<'p>> = None;
        for slot in self.plan.slots() {
            let target = slot.subcategory.target;
            let current = counts.get(&slot.domain.name, &slot.subcategory.name);
            if target == 0 || current >= target {
                continue;
            }
            let priority = (target - current) as f64 / target as f64;
            if best.map_or(true, |b| priority > b.priority) {
                best = Some(Selection {
                    domain: slot.domain,
                    subcategory: slot.subcategory,
                    current,
                    priority,
                });
            }
        }
        best
    }

    /// Randomised search request for a selection.
    pub fn plan_query(&self, selection: &Selection<'_>, rng: &mut dyn RandomSource) -> SearchQuery {
        let terms = &selection.domain.search_terms;
        let picked = if terms.is_empty() {
            selection.subcategory.name.clone()
        } else {
            terms[rng.index(terms.len())].clone()
        };
        let term = self.maybe_drop_word(picked, rng);
        let page = rng.range_inclusive(1, self.controls.max_page());
        let orientation = if rng.chance(self.controls.orientation_probability()) {
            Some(Orientation::ALL[rng.index(Orientation::ALL.len())])
        } else {
            None
        };
        SearchQuery {
            term,
            page,
            per_page: self.controls.page_size(),
            orientation,
        }
    }

    fn maybe_drop_word(&self, term: String, rng: &mut dyn RandomSource) -> String {
        let words: Vec<&str> = term.split_whitespace().collect();
        if words.len() < 2 || !rng.chance(self.controls.term_drop_probability()) {
            return term;
        }
        let drop = rng.index(words.len());
        words
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != drop)
            .map(|(_, word)| *word)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Runs until the global target, full allocations, or the iteration cap.
    ///
    /// Skipped candidates go to `skips`; catalog and storage errors abort.
    pub fn run(
        &self,
        catalog: &dyn CatalogStore,
        search: &mut dyn PhotoSearch,
        processor: &mut ImageProcessor<'_>,
        rng: &mut dyn RandomSource,
        skips: &mut dyn SkipSink,
    ) -> Result<IngestSummary> {
        let target = self.controls.global_target();
        let mut iterations = 0u64;
        let mut searches = 0u64;
        let mut stored = 0u64;
        let mut skipped = 0u64;

        let (stop, total_images) = loop {
            let mut counts = CountTable::from_counts(catalog.subcategory_counts()?);
            let mut total = catalog.total_images()?;
            if total >= target {
                break (StopReason::TargetReached, total);
            }
            let Some(selection) = self.select_next(&counts) else {
                break (StopReason::AllocationsFilled, total);
            };
            if self
                .controls
                .max_iterations()
                .is_some_and(|max| iterations >= max)
            {
                break (StopReason::IterationLimit, total);
            }
            iterations += 1;

            let query = self.plan_query(&selection, rng);
            let domain = selection.domain.name.as_str();
            let subcategory = selection.subcategory.name.as_str();
            tracing::info!(
                domain,
                subcategory,
                current = selection.current,
                target = selection.subcategory.target,
                term = %query.term,
                page = query.page,
                orientation = query.orientation.map(Orientation::as_str),
                "fetching"
            );
            let page = search.search(&query);
            searches += 1;

            for photo in &page.results {
                if total >= target {
                    break;
                }
                match processor.process(photo, domain, subcategory)? {
                    IngestOutcome::Stored(record) => {
                        total += 1;
                        stored += 1;
                        counts.increment(&record.domain, &record.subcategory);
                        if !self.controls.image_delay().is_zero() {
                            thread::sleep(self.controls.image_delay());
                        }
                    }
                    IngestOutcome::Skipped(reason) => {
                        skipped += 1;
                        skips.skipped(&photo.id, &reason);
                    }
                }
            }
            tracing::info!(
                domain,
                subcategory,
                subcategory_count = counts.get(domain, subcategory),
                total,
                "iteration finished"
            );
        };

        tracing::info!(%stop, stored, skipped, total_images, "ingestion finished");
        Ok(IngestSummary {
            iterations,
            searches,
            stored,
            skipped,
            total_images,
            stop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::object_store::MemoryObjectStore;
    use crate::processor::{DerivativeSize, SkipReason};
    use crate::random::SeededRandom;
    use crate::search::SearchPage;
    use crate::test_support::{
        photo, png_bytes, sample_record, ScriptedRandom, ScriptedSearch, StubFetcher,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn two_slot_plan() -> AllocationPlan {
        AllocationPlan {
            domains: vec![DomainAllocation {
                name: "D".into(),
                total: 200,
                subcategories: vec![
                    SubcategoryTarget {
                        name: "A".into(),
                        target: 100,
                    },
                    SubcategoryTarget {
                        name: "B".into(),
                        target: 100,
                    },
                ],
                search_terms: vec!["modern architecture".into(), "forest".into()],
            }],
        }
    }

    fn quiet_controls() -> IngestControls {
        IngestControls::default().with_image_delay(Duration::ZERO)
    }

    #[derive(Default)]
    struct RecordingSink(Vec<(String, SkipReason)>);

    impl SkipSink for RecordingSink {
        fn skipped(&mut self, photo_id: &str, reason: &SkipReason) {
            self.0.push((photo_id.to_string(), reason.clone()));
        }
    }

    #[test]
    fn lower_fill_ratio_wins() {
        let plan = two_slot_plan();
        let scheduler = IngestScheduler::new(&plan, quiet_controls());
        let mut counts = CountTable::default();
        counts.set("D", "A", 90);
        counts.set("D", "B", 10);
        let selection = scheduler.select_next(&counts).expect("selection");
        assert_eq!(selection.subcategory.name, "B");
        assert!((selection.priority - 0.9).abs() < 1e-12);
    }

    #[test]
    fn ties_go_to_plan_order() {
        let plan = two_slot_plan();
        let scheduler = IngestScheduler::new(&plan, quiet_controls());
        let selection = scheduler
            .select_next(&CountTable::default())
            .expect("selection");
        assert_eq!(selection.subcategory.name, "A");

        let mut counts = CountTable::default();
        counts.set("D", "A", 40);
        counts.set("D", "B", 40);
        assert_eq!(
            scheduler.select_next(&counts).expect("selection").subcategory.name,
            "A"
        );
    }

    #[test]
    fn full_allocations_select_nothing() {
        let plan = two_slot_plan();
        let scheduler = IngestScheduler::new(&plan, quiet_controls());
        let mut counts = CountTable::default();
        counts.set("D", "A", 100);
        counts.set("D", "B", 250);
        assert!(scheduler.select_next(&counts).is_none());
    }

    #[test]
    fn query_uses_scripted_choices() {
        let plan = two_slot_plan();
        let scheduler = IngestScheduler::new(&plan, quiet_controls());
        let selection = scheduler
            .select_next(&CountTable::default())
            .expect("selection");

        // term 0, drop word 1, page 7, orientation portrait
        let mut rng = ScriptedRandom::new(vec![0, 1, 7, 1], vec![true, true]);
        let query = scheduler.plan_query(&selection, &mut rng);
        assert_eq!(
            query,
            SearchQuery {
                term: "modern".into(),
                page: 7,
                per_page: 30,
                orientation: Some(Orientation::Portrait),
            }
        );

        // single-word terms never consult the drop coin
        let mut rng = ScriptedRandom::new(vec![1, 20], vec![false]);
        let query = scheduler.plan_query(&selection, &mut rng);
        assert_eq!(query.term, "forest");
        assert_eq!(query.page, 20);
        assert_eq!(query.orientation, None);
    }

    #[test]
    fn seeded_queries_stay_in_bounds() {
        let plan = AllocationPlan::default();
        let scheduler = IngestScheduler::new(&plan, quiet_controls());
        let selection = scheduler
            .select_next(&CountTable::default())
            .expect("selection");
        let mut rng = SeededRandom::from_seed(11);
        for _ in 0..200 {
            let query = scheduler.plan_query(&selection, &mut rng);
            assert!((1..=20).contains(&query.page));
            assert!(!query.term.is_empty());
        }
    }

    #[test]
    fn stops_without_searching_when_allocations_are_met() {
        let plan = AllocationPlan {
            domains: vec![DomainAllocation {
                name: "D".into(),
                total: 1,
                subcategories: vec![SubcategoryTarget {
                    name: "A".into(),
                    target: 1,
                }],
                search_terms: vec!["x".into()],
            }],
        };
        let catalog = MemoryCatalog::new();
        catalog
            .insert_image(&sample_record("p", "h", "D", "A"))
            .expect("insert");
        let store = MemoryObjectStore::new();
        let fetcher = StubFetcher::new();
        let mut processor = ImageProcessor::new(&catalog, &fetcher, &store);
        let mut search = ScriptedSearch::new(vec![]);
        let scheduler = IngestScheduler::new(&plan, quiet_controls());

        let summary = scheduler
            .run(
                &catalog,
                &mut search,
                &mut processor,
                &mut SeededRandom::from_seed(1),
                &mut RecordingSink::default(),
            )
            .expect("run");
        assert_eq!(summary.stop, StopReason::AllocationsFilled);
        assert_eq!(search.calls(), 0);
        assert_eq!(summary.searches, 0);
    }

    #[test]
    fn fills_until_global_target_mid_page() {
        let plan = two_slot_plan();
        let catalog = MemoryCatalog::new();
        let store = MemoryObjectStore::new();
        let mut fetcher = StubFetcher::new();
        let mut photos = Vec::new();
        for i in 0..5u8 {
            let url = format!("https://img/{i}");
            fetcher = fetcher.with(&url, png_bytes([i * 40, 0, 0], 12, 12));
            photos.push(photo(&format!("p{i}"), &url, &[]));
        }
        let mut search = ScriptedSearch::new(vec![SearchPage { results: photos }]);
        let mut processor = ImageProcessor::with_sizes(
            &catalog,
            &fetcher,
            &store,
            vec![DerivativeSize::new("medium", 8, 8)],
        );
        let scheduler =
            IngestScheduler::new(&plan, quiet_controls().with_global_target(3));

        let summary = scheduler
            .run(
                &catalog,
                &mut search,
                &mut processor,
                &mut SeededRandom::from_seed(3),
                &mut RecordingSink::default(),
            )
            .expect("run");
        assert_eq!(summary.stop, StopReason::TargetReached);
        assert_eq!(summary.stored, 3);
        assert_eq!(summary.searches, 1);
        assert_eq!(catalog.total_images().expect("count"), 3);
        assert_eq!(fetcher.calls(), 3);
        assert!(catalog.images().iter().all(|r| r.subcategory == "A"));
    }

    #[test]
    fn skips_do_not_abort_the_iteration() {
        let plan = two_slot_plan();
        let catalog = MemoryCatalog::new();
        let store = MemoryObjectStore::new();
        let fetcher = StubFetcher::new()
            .with("https://img/bad", b"garbage".to_vec())
            .with("https://img/good", png_bytes([0, 90, 0], 12, 12));
        let mut search = ScriptedSearch::new(vec![SearchPage {
            results: vec![
                photo("missing", "https://img/404", &[]),
                photo("bad", "https://img/bad", &[]),
                photo("good", "https://img/good", &[]),
            ],
        }]);
        let mut processor = ImageProcessor::with_sizes(
            &catalog,
            &fetcher,
            &store,
            vec![DerivativeSize::new("thumbnail", 8, 8)],
        );
        let scheduler =
            IngestScheduler::new(&plan, quiet_controls().with_max_iterations(Some(2)));
        let mut sink = RecordingSink::default();

        let summary = scheduler
            .run(
                &catalog,
                &mut search,
                &mut processor,
                &mut SeededRandom::from_seed(5),
                &mut sink,
            )
            .expect("run");
        assert_eq!(summary.stop, StopReason::IterationLimit);
        assert_eq!(summary.iterations, 2);
        assert_eq!(summary.stored, 1);
        assert_eq!(summary.skipped, 2);
        let kinds: Vec<&str> = sink.0.iter().map(|(_, r)| r.kind()).collect();
        assert_eq!(kinds, vec!["download", "decode"]);
        assert_eq!(search.calls(), 2);
    }

    #[test]
    fn empty_page_moves_on_to_the_next_iteration() {
        let plan = two_slot_plan();
        let catalog = MemoryCatalog::new();
        let store = MemoryObjectStore::new();
        let fetcher = StubFetcher::new().with("https://img/late", png_bytes([10, 10, 200], 12, 12));
        let mut search = ScriptedSearch::new(vec![
            SearchPage::default(),
            SearchPage {
                results: vec![photo("late", "https://img/late", &[])],
            },
        ]);
        let mut processor = ImageProcessor::with_sizes(
            &catalog,
            &fetcher,
            &store,
            vec![DerivativeSize::new("medium", 8, 8)],
        );
        let scheduler =
            IngestScheduler::new(&plan, quiet_controls().with_max_iterations(Some(3)));

        let summary = scheduler
            .run(
                &catalog,
                &mut search,
                &mut processor,
                &mut SeededRandom::from_seed(9),
                &mut RecordingSink::default(),
            )
            .expect("run");
        assert_eq!(summary.stop, StopReason::IterationLimit);
        assert_eq!(summary.iterations, 3);
        assert_eq!(summary.searches, 3);
        assert_eq!(summary.stored, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(catalog.total_images().expect("count"), 1);
    }
}

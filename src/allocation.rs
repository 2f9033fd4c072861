//! Static domain/subcategory taxonomy that drives ingestion quotas.
//!
//! Domain totals are advisory and kept exactly as configured; only
//! subcategory targets are enforced by the scheduler.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Ordered list of domains. Order matters: it breaks scheduling ties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    /// Domains in declaration order.
    pub domains: Vec<DomainAllocation>,
}

/// One top-level domain with its quota and search vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainAllocation {
    /// Domain label stored on every record.
    pub name: String,
    /// Informational total; not required to equal the subcategory sum.
    pub total: u64,
    /// Enforced per-subcategory quotas, in declaration order.
    pub subcategories: Vec<SubcategoryTarget>,
    /// Search terms shared by every subcategory of the domain.
    pub search_terms: Vec<String>,
}

/// Enforced quota for a subcategory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcategoryTarget {
    /// Subcategory label stored on every record.
    pub name: String,
    /// Number of images wanted.
    pub target: u64,
}

/// Flattened view of one subcategory together with its domain.
#[derive(Debug, Clone, Copy)]
pub struct Slot<'p> {
    /// Owning domain.
    pub domain: &'p DomainAllocation,
    /// Subcategory quota.
    pub subcategory: &'p SubcategoryTarget,
}

impl AllocationPlan {
    /// Loads a plan from a JSON file with the same shape as [`AllocationPlan`].
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open allocation plan {:?}", path))?;
        let plan: AllocationPlan = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("invalid allocation plan {:?}", path))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Rejects plans the scheduler cannot act on.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.domains.is_empty(), "allocation plan has no domains");
        for domain in &self.domains {
            anyhow::ensure!(
                !domain.name.trim().is_empty(),
                "allocation plan contains an unnamed domain"
            );
            anyhow::ensure!(
                !domain.search_terms.is_empty(),
                "domain '{}' has no search terms",
                domain.name
            );
            anyhow::ensure!(
                !domain.subcategories.is_empty(),
                "domain '{}' has no subcategories",
                domain.name
            );
            for sub in &domain.subcategories {
                anyhow::ensure!(
                    sub.target > 0,
                    "subcategory '{}/{}' must have a positive target",
                    domain.name,
                    sub.name
                );
            }
        }
        Ok(())
    }

    /// Every subcategory in plan order.
    pub fn slots(&self) -> impl Iterator<Item = Slot<'_>> {
        self.domains.iter().flat_map(|domain| {
            domain
                .subcategories
                .iter()
                .map(move |subcategory| Slot {
                    domain,
                    subcategory,
                })
        })
    }

    /// Looks up a domain by label.
    pub fn domain(&self, name: &str) -> Option<&DomainAllocation> {
        self.domains.iter().find(|domain| domain.name == name)
    }

    /// Sum of every enforced subcategory target.
    pub fn enforced_total(&self) -> u64 {
        self.slots().map(|slot| slot.subcategory.target).sum()
    }

    /// The taxonomy the corpus was originally curated against.
    pub fn default_taxonomy() -> Self {
        Self {
            domains: vec![
                domain(
                    "Visual Design",
                    25_000,
                    &[
                        ("Graphic design", 5_000),
                        ("UI/UX", 3_000),
                        ("Typography", 2_000),
                        ("Color theory", 5_000),
                        ("Patterns & textures", 5_000),
                        ("Logos & branding", 5_000),
                    ],
                    &[
                        "graphic design",
                        "ui design",
                        "typography",
                        "color theory",
                        "patterns",
                        "textures",
                        "logos",
                        "branding",
                        "visual identity",
                        "graphic art",
                        "design elements",
                        "marketing materials",
                    ],
                ),
                domain(
                    "Fashion & Style",
                    20_000,
                    &[
                        ("Contemporary fashion", 5_000),
                        ("Historical fashion", 3_000),
                        ("Street style", 3_000),
                        ("Haute couture", 2_000),
                        ("Accessories", 2_000),
                        ("Textiles & fabrics", 5_000),
                    ],
                    &[
                        "fashion",
                        "style",
                        "outfit",
                        "clothing",
                        "dress",
                        "streetwear",
                        "haute couture",
                        "fashion accessories",
                        "textiles",
                        "fabrics",
                        "fashion photography",
                        "fashion editorial",
                    ],
                ),
                domain(
                    "Art & Photography",
                    15_000,
                    &[
                        ("Fine art", 5_000),
                        ("Contemporary art", 3_000),
                        ("Photography styles", 5_000),
                        ("Illustration", 2_000),
                    ],
                    &[
                        "art",
                        "fine art",
                        "contemporary art",
                        "photography",
                        "black and white",
                        "portrait photography",
                        "landscape photography",
                        "illustration",
                        "painting",
                        "sculpture",
                        "mixed media",
                        "artistic",
                    ],
                ),
                domain(
                    "Architecture & Interiors",
                    15_000,
                    &[
                        ("Architectural styles", 5_000),
                        ("Interior design styles", 5_000),
                        ("Public spaces", 2_000),
                        ("Residential spaces", 3_000),
                    ],
                    &[
                        "architecture",
                        "buildings",
                        "interior design",
                        "homes",
                        "public spaces",
                        "modern architecture",
                        "classical architecture",
                        "interior decoration",
                        "minimalist interior",
                        "luxury interior",
                        "urban spaces",
                    ],
                ),
                domain(
                    "Events & Occasions",
                    10_000,
                    &[
                        ("Weddings", 2_000),
                        ("Corporate events", 2_000),
                        ("Celebrations", 2_000),
                        ("Seasonal events", 2_000),
                        ("Sports & entertainment", 2_000),
                    ],
                    &[
                        "wedding",
                        "corporate event",
                        "party",
                        "celebration",
                        "festival",
                        "concert",
                        "sports event",
                        "conference",
                        "ceremony",
                        "holiday celebration",
                        "event decoration",
                        "event planning",
                    ],
                ),
                domain(
                    "Nature & Landscapes",
                    10_000,
                    &[
                        ("Biomes & ecosystems", 3_000),
                        ("Weather & atmospheric", 2_000),
                        ("Seasons", 3_000),
                        ("Geographic features", 2_000),
                    ],
                    &[
                        "nature",
                        "landscape",
                        "forest",
                        "mountain",
                        "ocean",
                        "desert",
                        "weather",
                        "storm",
                        "sunset",
                        "spring",
                        "summer",
                        "autumn",
                        "winter",
                        "natural formation",
                        "natural wonder",
                    ],
                ),
                domain(
                    "Industrial & Product",
                    5_000,
                    &[("Product photography", 2_000), ("Industrial design", 3_000)],
                    &[
                        "product photography",
                        "industrial design",
                        "industrial architecture",
                        "manufacturing",
                        "machinery",
                        "product showcase",
                        "commercial photography",
                        "product design",
                        "technology",
                        "tools",
                        "craftsmanship",
                    ],
                ),
            ],
        }
    }
}

impl Default for AllocationPlan {
    fn default() -> Self {
        Self::default_taxonomy()
    }
}

fn domain(name: &str, total: u64, subs: &[(&str, u64)], terms: &[&str]) -> DomainAllocation {
    DomainAllocation {
        name: name.to_string(),
        total,
        subcategories: subs
            .iter()
            .map(|(name, target)| SubcategoryTarget {
                name: (*name).to_string(),
                target: *target,
            })
            .collect(),
        search_terms: terms.iter().map(|term| (*term).to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn default_taxonomy_is_valid_and_ordered() {
        let plan = AllocationPlan::default();
        plan.validate().expect("default plan valid");
        let names: Vec<&str> = plan.domains.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Visual Design",
                "Fashion & Style",
                "Art & Photography",
                "Architecture & Interiors",
                "Events & Occasions",
                "Nature & Landscapes",
                "Industrial & Product",
            ]
        );
        let first = plan.slots().next().expect("first slot");
        assert_eq!(first.domain.name, "Visual Design");
        assert_eq!(first.subcategory.name, "Graphic design");
        assert_eq!(plan.slots().count(), 31);
    }

    #[test]
    fn domain_totals_are_kept_verbatim() {
        let mut plan = AllocationPlan::default();
        plan.domains[0].total = 1;
        plan.validate().expect("advisory totals never rejected");
        assert_eq!(plan.domain("Visual Design").map(|d| d.total), Some(1));
        assert_eq!(plan.enforced_total(), 100_000);
    }

    #[test]
    fn loads_plan_from_json() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"domains":[{{"name":"Tiny","total":3,"subcategories":[{{"name":"A","target":1}},{{"name":"B","target":5}}],"search_terms":["one"]}}]}}"#
        )
        .expect("write plan");
        let plan = AllocationPlan::from_json_file(file.path()).expect("load plan");
        assert_eq!(plan.domains[0].total, 3);
        assert_eq!(plan.enforced_total(), 6);
    }

    #[test]
    fn rejects_zero_targets_and_missing_terms() {
        let mut plan = AllocationPlan::default();
        plan.domains[1].subcategories[0].target = 0;
        assert!(plan.validate().is_err());

        let mut plan = AllocationPlan::default();
        plan.domains[2].search_terms.clear();
        assert!(plan.validate().is_err());
    }
}

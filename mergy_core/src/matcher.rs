use mergy_common::{FolderMatchGroup, FolderRecord, MatchTier, MergyError, Result};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Characters treated as name delimiters by every tier.
const DELIMITERS: [char; 4] = ['-', '_', '.', ' '];

fn is_delimiter(c: char) -> bool {
    DELIMITERS.contains(&c)
}

/// Outcome of evaluating a single folder-name pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairMatch {
    pub confidence: f64,
    pub tier: MatchTier,
    pub base_name: String,
}

/// Four-tier folder name matcher with union-find grouping.
///
/// Pure computation over in-memory records; the only failure mode is an
/// out-of-range confidence threshold at construction.
pub struct FolderMatcher {
    min_confidence: f64,
}

impl FolderMatcher {
    pub fn new(min_confidence: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(MergyError::Config(format!(
                "min_confidence must be within [0.0, 1.0], got {min_confidence}"
            )));
        }
        Ok(Self { min_confidence })
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    /// Evaluate one pair of folder names, applying the configured
    /// confidence threshold. Identical names never match.
    pub fn match_pair(&self, name1: &str, name2: &str) -> Option<PairMatch> {
        evaluate_pair(name1, name2).filter(|m| m.confidence >= self.min_confidence)
    }

    /// Find all transitively-related folder groups.
    ///
    /// Deterministic for a given input: members sort by name, groups sort
    /// by confidence descending with alphabetical tie-breaks.
    pub fn find_matches(&self, folders: &[FolderRecord]) -> Vec<FolderMatchGroup> {
        if folders.len() < 2 {
            return Vec::new();
        }

        struct Edge {
            a: usize,
            b: usize,
            hit: PairMatch,
        }

        let mut edges: Vec<Edge> = Vec::new();
        for i in 0..folders.len() {
            for j in (i + 1)..folders.len() {
                if let Some(hit) = self.match_pair(&folders[i].name, &folders[j].name) {
                    debug!(
                        left = %folders[i].name,
                        right = %folders[j].name,
                        tier = %hit.tier,
                        confidence = hit.confidence,
                        "folder pair matched"
                    );
                    edges.push(Edge { a: i, b: j, hit });
                }
            }
        }

        let mut uf = UnionFind::new(folders.len());
        for edge in &edges {
            uf.union(edge.a, edge.b);
        }

        // Collect each component's edges, then its full membership.
        let mut component_edges: BTreeMap<usize, Vec<&Edge>> = BTreeMap::new();
        for edge in &edges {
            component_edges.entry(uf.find(edge.a)).or_default().push(edge);
        }
        let mut component_members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for idx in 0..folders.len() {
            let root = uf.find(idx);
            if component_edges.contains_key(&root) {
                component_members.entry(root).or_default().push(idx);
            }
        }

        let mut groups: Vec<FolderMatchGroup> = Vec::new();
        for (root, members) in component_members {
            let edges = &component_edges[&root];

            // Strongest edge decides the group's confidence and tier.
            let Some(best) = edges.iter().min_by(|x, y| {
                y.hit
                    .confidence
                    .partial_cmp(&x.hit.confidence)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| x.hit.tier.cmp(&y.hit.tier))
                    .then_with(|| x.hit.base_name.cmp(&y.hit.base_name))
            }) else {
                continue;
            };

            // Most frequent base name wins; ties go to the shortest.
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for edge in edges {
                *counts.entry(edge.hit.base_name.as_str()).or_insert(0) += 1;
            }
            let base_name = counts
                .iter()
                .min_by(|(name_x, count_x), (name_y, count_y)| {
                    count_y
                        .cmp(count_x)
                        .then_with(|| name_x.len().cmp(&name_y.len()))
                        .then_with(|| name_x.cmp(name_y))
                })
                .map(|(name, _)| name.to_string())
                .unwrap_or_else(|| best.hit.base_name.clone());

            let mut group_folders: Vec<FolderRecord> =
                members.into_iter().map(|i| folders[i].clone()).collect();
            group_folders.sort_by(|x, y| x.name.cmp(&y.name).then_with(|| x.path.cmp(&y.path)));

            groups.push(FolderMatchGroup {
                folders: group_folders,
                confidence: best.hit.confidence,
                tier: best.hit.tier,
                base_name,
            });
        }

        groups.sort_by(|x, y| {
            y.confidence
                .partial_cmp(&x.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| x.base_name.cmp(&y.base_name))
        });
        groups
    }
}

/// Run the tiers in priority order and return the first that fires.
fn evaluate_pair(name1: &str, name2: &str) -> Option<PairMatch> {
    if name1 == name2 {
        return None;
    }

    exact_prefix_match(name1, name2)
        .or_else(|| normalized_match(name1, name2))
        .or_else(|| token_match(name1, name2))
        .or_else(|| fuzzy_match(name1, name2))
}

/// Tier 1: the shorter name is a true prefix of the longer, bounded by a
/// delimiter. Confidence 1.0; base name is the shorter name.
fn exact_prefix_match(name1: &str, name2: &str) -> Option<PairMatch> {
    let (shorter, longer) = if name1.len() <= name2.len() {
        (name1, name2)
    } else {
        (name2, name1)
    };

    if shorter.len() >= longer.len() || !longer.starts_with(shorter) {
        return None;
    }

    // starts_with guarantees the boundary falls between characters
    let next = longer[shorter.len()..].chars().next()?;
    if !is_delimiter(next) {
        return None;
    }

    Some(PairMatch {
        confidence: 1.0,
        tier: MatchTier::ExactPrefix,
        base_name: shorter.to_string(),
    })
}

/// Collapse delimiter runs to single spaces, trim, lower-case. Returns
/// None for forms that are empty or carry no alphanumeric character.
fn normalize(name: &str) -> Option<String> {
    let mut out = String::with_capacity(name.len());
    let mut pending_space = false;
    for c in name.chars() {
        if is_delimiter(c) {
            pending_space = !out.is_empty();
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.extend(c.to_lowercase());
        }
    }

    if out.chars().any(|c| c.is_alphanumeric()) {
        Some(out)
    } else {
        None
    }
}

/// Tier 2: names are equal once delimiters are normalized away.
/// Confidence 0.9; base name is the shared normalized form.
fn normalized_match(name1: &str, name2: &str) -> Option<PairMatch> {
    let normalized1 = normalize(name1)?;
    let normalized2 = normalize(name2)?;

    if normalized1 != normalized2 {
        return None;
    }

    Some(PairMatch {
        confidence: 0.9,
        tier: MatchTier::Normalized,
        base_name: normalized1,
    })
}

fn tokens(name: &str) -> Vec<String> {
    name.split(is_delimiter)
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Tier 3: Jaccard similarity over de-duplicated token sets. Requires
/// at least 0.5 overlap; confidence scales from 0.7 up to a 0.9 ceiling.
/// Base name is the longer raw name.
fn token_match(name1: &str, name2: &str) -> Option<PairMatch> {
    let set1: std::collections::BTreeSet<String> = tokens(name1).into_iter().collect();
    let set2: std::collections::BTreeSet<String> = tokens(name2).into_iter().collect();

    if set1.is_empty() || set2.is_empty() {
        return None;
    }

    let intersection = set1.intersection(&set2).count();
    let union = set1.union(&set2).count();
    let jaccard = intersection as f64 / union as f64;

    if jaccard < 0.5 {
        return None;
    }

    let confidence = (0.7 + (jaccard - 0.5) * 0.4).min(0.9);
    let base_name = if name1.len() >= name2.len() {
        name1
    } else {
        name2
    };

    Some(PairMatch {
        confidence,
        tier: MatchTier::TokenMatch,
        base_name: base_name.to_string(),
    })
}

/// Both names end in digits after an identical prefix, with different
/// numeric suffixes (`computer01` vs `computer02`).
fn differs_only_in_numeric_suffix(name1: &str, name2: &str) -> bool {
    let prefix1 = name1.trim_end_matches(|c: char| c.is_ascii_digit());
    let prefix2 = name2.trim_end_matches(|c: char| c.is_ascii_digit());
    let suffix1 = &name1[prefix1.len()..];
    let suffix2 = &name2[prefix2.len()..];

    !suffix1.is_empty()
        && !suffix2.is_empty()
        && prefix1.eq_ignore_ascii_case(prefix2)
        && suffix1 != suffix2
}

fn short_suffix(name: &str) -> Option<(&str, &str)> {
    let pos = name.rfind(is_delimiter)?;
    // delimiters are single-byte ASCII
    let suffix = &name[pos + 1..];
    let len = suffix.chars().count();
    if (1..=2).contains(&len) && suffix.chars().all(|c| c.is_alphanumeric()) {
        Some((&name[..pos], suffix))
    } else {
        None
    }
}

/// Both names end in a short (<= 2 chars) alphanumeric suffix after a
/// delimiter, with the same prefix but different suffixes
/// (`folder-a` vs `folder-b`).
fn differs_only_in_short_suffix(name1: &str, name2: &str) -> bool {
    match (short_suffix(name1), short_suffix(name2)) {
        (Some((prefix1, suffix1)), Some((prefix2, suffix2))) => {
            prefix1.eq_ignore_ascii_case(prefix2) && !suffix1.eq_ignore_ascii_case(suffix2)
        }
        _ => false,
    }
}

/// Tier 4: token-order-independent similarity ratio. The two guards fire
/// first so that serially-numbered siblings never fuzzy-match. Requires
/// a 0.85 ratio; confidence scales from 0.7 up to 1.0. Base name is the
/// alphabetically first raw name.
fn fuzzy_match(name1: &str, name2: &str) -> Option<PairMatch> {
    if differs_only_in_numeric_suffix(name1, name2) {
        return None;
    }
    if differs_only_in_short_suffix(name1, name2) {
        return None;
    }

    let mut tokens1 = tokens(name1);
    let mut tokens2 = tokens(name2);
    tokens1.sort();
    tokens2.sort();
    let sorted1 = tokens1.join(" ");
    let sorted2 = tokens2.join(" ");

    let similarity = strsim::normalized_levenshtein(&sorted1, &sorted2);
    if similarity < 0.85 {
        return None;
    }

    let confidence = (0.7 + (similarity - 0.85) * 2.0).min(1.0);
    let base_name = if name1 <= name2 { name1 } else { name2 };

    Some(PairMatch {
        confidence,
        tier: MatchTier::FuzzyMatch,
        base_name: base_name.to_string(),
    })
}

/// Arena-of-indices union-find with path compression and union by rank.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = x;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        match self.rank[root_a].cmp(&self.rank[root_b]) {
            Ordering::Less => self.parent[root_a] = root_b,
            Ordering::Greater => self.parent[root_b] = root_a,
            Ordering::Equal => {
                self.parent[root_b] = root_a;
                self.rank[root_a] += 1;
            }
        }
    }
}

// 🔗 Entity Resolution - Merge transactors that are the same party
// Blocked pairwise comparison, weighted name/address scoring, union-find
// clustering, then canonical rewrite of every foreign key in the batch

use crate::entities::{TransactorKind, TransactorRecord};
use crate::normalize::DataBatch;
use crate::reader::Row;
use crate::schema::DataSchema;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// RESOLUTION OUTCOME
// ============================================================================

/// One merged-away id, where it went, and where the original row came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdMapping {
    pub original_id: String,
    pub canonical_id: String,
    pub source_table: String,
    pub source_file: String,
}

/// A recoverable problem hit during resolution. These never abort the run;
/// they are collected and surfaced through the run report.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionError {
    /// A block exceeded the pairwise comparison cap and was skipped
    BlockingOverflow { block: String, size: usize, cap: usize },

    /// A cluster mixed individuals and organizations and was rejected
    TypeConflict { members: Vec<String> },
}

impl std::fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionError::BlockingOverflow { block, size, cap } => {
                write!(f, "block '{}' has {} records, over the cap of {}", block, size, cap)
            }
            ResolutionError::TypeConflict { members } => {
                write!(f, "cluster of {} records mixes kinds", members.len())
            }
        }
    }
}

impl std::error::Error for ResolutionError {}

#[derive(Debug, Clone, Default)]
pub struct ResolutionOutcome {
    /// Records folded into a canonical record
    pub merges: usize,

    /// Clusters of size two or more that survived checks
    pub clusters: usize,

    /// Blocks and clusters skipped along the way
    pub errors: Vec<ResolutionError>,

    pub id_mapping: Vec<IdMapping>,
}

impl ResolutionOutcome {
    pub fn overflowed_blocks(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| matches!(e, ResolutionError::BlockingOverflow { .. }))
            .count()
    }

    pub fn type_conflicts(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| matches!(e, ResolutionError::TypeConflict { .. }))
            .count()
    }
}

// ============================================================================
// NAME NORMALIZATION
// ============================================================================

const ORG_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "llc", "llp", "lp", "ltd", "corp", "corporation", "co", "company",
];

/// Lowercase, strip punctuation, collapse whitespace. Organization names
/// additionally lose trailing corporate suffixes so "Acme Corp." and
/// "ACME CORPORATION" normalize identically.
pub fn normalize_name(name: &str, kind: Option<TransactorKind>) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut tokens: Vec<&str> = lowered.split_whitespace().collect();
    if kind != Some(TransactorKind::Individual) {
        while let Some(last) = tokens.last() {
            if ORG_SUFFIXES.contains(last) {
                tokens.pop();
            } else {
                break;
            }
        }
    }
    tokens.join(" ")
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// 1.0 for identical strings, 0.0 when every character differs
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 0.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

// ============================================================================
// UNION-FIND
// ============================================================================

/// Disjoint sets over record indices, path compression plus union by rank
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        UnionFind {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.rank[ra] < self.rank[rb] {
            self.parent[ra] = rb;
        } else if self.rank[ra] > self.rank[rb] {
            self.parent[rb] = ra;
        } else {
            self.parent[rb] = ra;
            self.rank[ra] += 1;
        }
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

struct Candidate {
    table: String,
    record: TransactorRecord,
    normalized: String,
}

pub struct EntityResolver<'a> {
    schema: &'a DataSchema,
    /// A pair must score at least this much to merge
    pub match_threshold: f64,
    pub name_weight: f64,
    pub address_weight: f64,
    /// Blocks larger than this are skipped instead of compared pairwise
    pub block_cap: usize,
}

impl<'a> EntityResolver<'a> {
    pub fn new(schema: &'a DataSchema) -> Self {
        EntityResolver {
            schema,
            match_threshold: 0.82,
            name_weight: 0.7,
            address_weight: 0.3,
            block_cap: 500,
        }
    }

    /// Resolve duplicate transactors in place: non-canonical rows are
    /// removed and every foreign key in the batch is rewritten to the
    /// canonical id. Running a second time over the result is a no-op.
    pub fn resolve(&self, batch: &mut DataBatch) -> Result<ResolutionOutcome> {
        let candidates = self.collect_candidates(batch);
        let addresses = collect_addresses(batch);

        let mut outcome = ResolutionOutcome::default();
        let mut dsu = UnionFind::new(candidates.len());
        for (_, members) in self.blocks(&candidates, &mut outcome) {
            for i in 0..members.len() {
                for j in i + 1..members.len() {
                    let (a, b) = (members[i], members[j]);
                    if candidates[a].record.id == candidates[b].record.id {
                        dsu.union(a, b);
                        continue;
                    }
                    if kinds_conflict(&candidates[a].record, &candidates[b].record) {
                        continue;
                    }
                    let score = self.pair_score(&candidates[a], &candidates[b], &addresses);
                    if score >= self.match_threshold {
                        dsu.union(a, b);
                    }
                }
            }
        }

        let clusters = cluster_members(&candidates, &mut dsu);
        let mut id_map: BTreeMap<String, String> = BTreeMap::new();
        let mut canonical_rows: BTreeMap<String, (String, Row)> = BTreeMap::new();
        for members in clusters {
            if members.len() < 2 {
                continue;
            }
            if cluster_kinds_conflict(&candidates, &members) {
                outcome.errors.push(ResolutionError::TypeConflict {
                    members: members
                        .iter()
                        .map(|&i| candidates[i].record.id.clone())
                        .collect(),
                });
                continue;
            }
            let (canonical_id, table, merged) =
                self.canonicalize(batch, &candidates, &members);
            outcome.clusters += 1;
            for &index in &members {
                let original = &candidates[index].record.id;
                if *original != canonical_id {
                    outcome.merges += 1;
                    id_map.insert(original.clone(), canonical_id.clone());
                    outcome.id_mapping.push(IdMapping {
                        original_id: original.clone(),
                        canonical_id: canonical_id.clone(),
                        source_table: candidates[index].table.clone(),
                        source_file: batch
                            .provenance
                            .get(original)
                            .cloned()
                            .unwrap_or_default(),
                    });
                }
            }
            canonical_rows.insert(canonical_id.clone(), (table, merged));
        }
        outcome.id_mapping.sort_by(|a, b| a.original_id.cmp(&b.original_id));

        self.rewrite(batch, &id_map, &canonical_rows);
        Ok(outcome)
    }

    fn collect_candidates(&self, batch: &DataBatch) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for table in self.transactor_tables() {
            for row in batch.rows(&table) {
                let record = TransactorRecord::from_row(&table, row);
                if record.id.is_empty() {
                    continue;
                }
                let normalized = normalize_name(&record.full_name, record.kind());
                candidates.push(Candidate {
                    table: table.clone(),
                    record,
                    normalized,
                });
            }
        }
        candidates
    }

    fn transactor_tables(&self) -> Vec<String> {
        if self.schema.contains("Transactor") {
            self.schema.family_of("Transactor")
        } else {
            Vec::new()
        }
    }

    /// Individuals block on last name token plus state, organizations on a
    /// name prefix plus state. Records of unknown kind join both block
    /// families so they can still match either side.
    fn blocks(
        &self,
        candidates: &[Candidate],
        outcome: &mut ResolutionOutcome,
    ) -> Vec<(String, Vec<usize>)> {
        let mut blocks: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, candidate) in candidates.iter().enumerate() {
            if candidate.normalized.is_empty() {
                continue;
            }
            for key in blocking_keys(candidate) {
                blocks.entry(key).or_default().push(index);
            }
        }
        blocks
            .into_iter()
            .filter(|(key, members)| {
                if members.len() > self.block_cap {
                    outcome.errors.push(ResolutionError::BlockingOverflow {
                        block: key.clone(),
                        size: members.len(),
                        cap: self.block_cap,
                    });
                    false
                } else {
                    members.len() > 1
                }
            })
            .collect()
    }

    /// Weighted name and address agreement. When neither record carries a
    /// comparable address the name carries the full weight.
    fn pair_score(
        &self,
        a: &Candidate,
        b: &Candidate,
        addresses: &BTreeMap<String, Vec<Row>>,
    ) -> f64 {
        let name_score = name_similarity(&a.normalized, &b.normalized);
        match address_agreement(
            addresses.get(&a.record.id),
            addresses.get(&b.record.id),
        ) {
            Some(address_score) => {
                name_score * self.name_weight + address_score * self.address_weight
            }
            None => name_score,
        }
    }

    /// Canonical id is the lexicographically lowest member id; each field
    /// takes the longest non-empty value across the cluster, members in id
    /// order so ties resolve the same way every run.
    fn canonicalize(
        &self,
        batch: &DataBatch,
        candidates: &[Candidate],
        members: &[usize],
    ) -> (String, String, Row) {
        let mut ordered: Vec<&Candidate> = members.iter().map(|&i| &candidates[i]).collect();
        ordered.sort_by(|a, b| a.record.id.cmp(&b.record.id));
        let canonical = ordered[0];

        let mut merged = Row::new();
        let mut table = canonical.table.clone();
        for candidate in &ordered {
            // Prefer a concrete child table over the root
            if table == "Transactor" && candidate.table != "Transactor" {
                table = candidate.table.clone();
            }
            if let Some(row) = batch
                .rows(&candidate.table)
                .iter()
                .find(|r| r.get("id").map(|v| v == &candidate.record.id).unwrap_or(false))
            {
                for (column, value) in row {
                    if value.is_empty() {
                        continue;
                    }
                    let current = merged.get(column).map(|v| v.len()).unwrap_or(0);
                    if value.len() > current {
                        merged.insert(column.clone(), value.clone());
                    }
                }
            }
        }
        merged.insert("id".to_string(), canonical.record.id.clone());
        (canonical.record.id.clone(), table, merged)
    }

    /// Drop merged-away rows, install merged canonical rows, rewrite every
    /// id-bearing column across the batch
    fn rewrite(
        &self,
        batch: &mut DataBatch,
        id_map: &BTreeMap<String, String>,
        canonical_rows: &BTreeMap<String, (String, Row)>,
    ) {
        if id_map.is_empty() {
            return;
        }
        // Merged-away rows go; canonical rows come out too and are
        // re-inserted in merged form, possibly in a more specific table
        for table in self.transactor_tables() {
            if let Some(rows) = batch.tables.get_mut(&table) {
                rows.retain(|row| {
                    let id = row.get("id").map(|v| v.as_str()).unwrap_or("");
                    !id_map.contains_key(id) && !canonical_rows.contains_key(id)
                });
            }
        }
        for (id, (table, row)) in canonical_rows {
            let mut row = row.clone();
            row.insert("id".to_string(), id.clone());
            batch.push(table, row);
        }
        // Only id-bearing columns are rewritten; free text that happens to
        // equal a merged id stays untouched
        for rows in batch.tables.values_mut() {
            for row in rows.iter_mut() {
                for (column, value) in row.iter_mut() {
                    if !column.ends_with("_id") {
                        continue;
                    }
                    if let Some(canonical) = id_map.get(value) {
                        *value = canonical.clone();
                    }
                }
            }
        }
    }
}

fn blocking_keys(candidate: &Candidate) -> Vec<String> {
    let state = &candidate.record.reported_state;
    let individual_key = || {
        candidate
            .normalized
            .rsplit(' ')
            .next()
            .map(|last| format!("i|{}|{}", last, state))
    };
    let organization_key = || {
        let prefix: String = candidate.normalized.chars().take(6).collect();
        Some(format!("o|{}|{}", prefix, state))
    };
    match candidate.record.kind() {
        Some(TransactorKind::Individual) => individual_key().into_iter().collect(),
        Some(TransactorKind::Organization) => organization_key().into_iter().collect(),
        None => individual_key()
            .into_iter()
            .chain(organization_key())
            .collect(),
    }
}

fn kinds_conflict(a: &TransactorRecord, b: &TransactorRecord) -> bool {
    matches!((a.kind(), b.kind()), (Some(ka), Some(kb)) if ka != kb)
}

fn cluster_kinds_conflict(candidates: &[Candidate], members: &[usize]) -> bool {
    let mut seen: Option<TransactorKind> = None;
    for &index in members {
        if let Some(kind) = candidates[index].record.kind() {
            match seen {
                Some(s) if s != kind => return true,
                _ => seen = Some(kind),
            }
        }
    }
    false
}

fn cluster_members(candidates: &[Candidate], dsu: &mut UnionFind) -> Vec<Vec<usize>> {
    let mut clusters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for index in 0..candidates.len() {
        clusters.entry(dsu.find(index)).or_default().push(index);
    }
    clusters.into_values().collect()
}

/// Fraction of non-empty-on-both-sides address fields that agree across the
/// closest pair of addresses. None when there is nothing comparable.
fn address_agreement(a: Option<&Vec<Row>>, b: Option<&Vec<Row>>) -> Option<f64> {
    let (a, b) = (a?, b?);
    let mut best: Option<f64> = None;
    for left in a {
        for right in b {
            let mut compared = 0usize;
            let mut matched = 0usize;
            for field in ["line_one", "city", "state", "zipcode"] {
                let lv = left.get(field).map(|v| v.trim()).unwrap_or("");
                let rv = right.get(field).map(|v| v.trim()).unwrap_or("");
                if lv.is_empty() || rv.is_empty() {
                    continue;
                }
                compared += 1;
                if lv.eq_ignore_ascii_case(rv) {
                    matched += 1;
                }
            }
            if compared > 0 {
                let score = matched as f64 / compared as f64;
                best = Some(best.map_or(score, |b: f64| b.max(score)));
            }
        }
    }
    best
}

fn collect_addresses(batch: &DataBatch) -> BTreeMap<String, Vec<Row>> {
    let mut by_transactor: BTreeMap<String, Vec<Row>> = BTreeMap::new();
    for row in batch.rows("Address") {
        if let Some(owner) = row.get("transactor_id") {
            if !owner.is_empty() {
                by_transactor.entry(owner.clone()).or_default().push(row.clone());
            }
        }
    }
    by_transactor
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::sample_schema;

    fn org_row(id: &str, name: &str, state: &str) -> Row {
        Row::from([
            ("id".to_string(), id.to_string()),
            ("full_name".to_string(), name.to_string()),
            ("transactor_type".to_string(), "Corporation".to_string()),
            ("reported_state".to_string(), state.to_string()),
        ])
    }

    fn address_row(transactor_id: &str, city: &str, state: &str) -> Row {
        Row::from([
            ("id".to_string(), format!("addr-{}", transactor_id)),
            ("transactor_id".to_string(), transactor_id.to_string()),
            ("city".to_string(), city.to_string()),
            ("state".to_string(), state.to_string()),
        ])
    }

    #[test]
    fn test_normalize_name_strips_org_suffixes() {
        assert_eq!(
            normalize_name("ACME CORP.", Some(TransactorKind::Organization)),
            "acme"
        );
        assert_eq!(
            normalize_name("Acme Corporation", Some(TransactorKind::Organization)),
            "acme"
        );
        // Individuals keep every token
        assert_eq!(
            normalize_name("J. Smith Co", Some(TransactorKind::Individual)),
            "j smith co"
        );
    }

    #[test]
    fn test_name_similarity_bounds() {
        assert_eq!(name_similarity("acme", "acme"), 1.0);
        assert!(name_similarity("acme", "acne") > 0.7);
        assert!(name_similarity("acme", "zzzz") < 0.1);
    }

    #[test]
    fn test_same_name_same_city_merges() {
        let schema = sample_schema();
        let mut batch = DataBatch::new();
        batch.push("Organization", org_row("t-b", "ACME CORP", "IL"));
        batch.push("Organization", org_row("t-a", "Acme Corp.", "IL"));
        batch.provenance.insert("t-a".to_string(), "orgs_a.csv".to_string());
        batch.provenance.insert("t-b".to_string(), "orgs_b.csv".to_string());
        batch.push("Address", address_row("t-a", "CHICAGO", "IL"));
        batch.push("Address", address_row("t-b", "Chicago", "IL"));
        batch.push(
            "Transaction",
            Row::from([
                ("id".to_string(), "txn-1".to_string()),
                ("donor_id".to_string(), "t-b".to_string()),
                ("recipient_id".to_string(), "t-a".to_string()),
                ("amount".to_string(), "5.00".to_string()),
            ]),
        );

        let resolver = EntityResolver::new(&schema);
        let outcome = resolver.resolve(&mut batch).unwrap();

        assert_eq!(outcome.merges, 1);
        assert_eq!(batch.rows("Organization").len(), 1);
        // Lowest id wins as canonical
        assert_eq!(batch.rows("Organization")[0]["id"], "t-a");
        // Foreign keys across the batch now point at the canonical id
        let txn = &batch.rows("Transaction")[0];
        assert_eq!(txn["donor_id"], "t-a");
        assert_eq!(txn["recipient_id"], "t-a");
        assert_eq!(batch.rows("Address")[0]["transactor_id"], "t-a");
        assert_eq!(outcome.id_mapping.len(), 1);
        assert_eq!(outcome.id_mapping[0].original_id, "t-b");
        // The mapping carries where the merged-away row came from
        assert_eq!(outcome.id_mapping[0].source_table, "Organization");
        assert_eq!(outcome.id_mapping[0].source_file, "orgs_b.csv");
    }

    #[test]
    fn test_rewrite_leaves_free_text_alone() {
        let schema = sample_schema();
        let mut batch = DataBatch::new();
        batch.push("Organization", org_row("t-a", "Acme Corp.", "IL"));
        batch.push("Organization", org_row("t-b", "ACME CORP", "IL"));
        batch.push(
            "Transaction",
            Row::from([
                ("id".to_string(), "txn-1".to_string()),
                ("donor_id".to_string(), "t-b".to_string()),
                ("recipient_id".to_string(), "t-a".to_string()),
                ("amount".to_string(), "5.00".to_string()),
                // Description coincides with a merged-away id
                ("description".to_string(), "t-b".to_string()),
            ]),
        );

        let resolver = EntityResolver::new(&schema);
        let outcome = resolver.resolve(&mut batch).unwrap();
        assert_eq!(outcome.merges, 1);

        let txn = &batch.rows("Transaction")[0];
        assert_eq!(txn["donor_id"], "t-a");
        assert_eq!(txn["description"], "t-b");
    }

    #[test]
    fn test_different_state_blocks_apart() {
        let schema = sample_schema();
        let mut batch = DataBatch::new();
        batch.push("Organization", org_row("t-a", "Acme Corp.", "IL"));
        batch.push("Organization", org_row("t-b", "ACME CORP", "TX"));

        let resolver = EntityResolver::new(&schema);
        let outcome = resolver.resolve(&mut batch).unwrap();

        assert_eq!(outcome.merges, 0);
        assert_eq!(batch.rows("Organization").len(), 2);
    }

    #[test]
    fn test_same_name_different_address_does_not_merge() {
        let schema = sample_schema();
        let mut batch = DataBatch::new();
        batch.push("Organization", org_row("t-a", "Acme", "IL"));
        batch.push("Organization", org_row("t-b", "Acme", "IL"));
        batch.push("Address", address_row("t-a", "CHICAGO", "IL"));
        batch.push("Address", address_row("t-b", "HOUSTON", "TX"));

        let resolver = EntityResolver::new(&schema);
        let outcome = resolver.resolve(&mut batch).unwrap();

        // Identical names but zero address agreement lands under threshold
        assert_eq!(outcome.merges, 0);
        assert_eq!(batch.rows("Organization").len(), 2);
    }

    #[test]
    fn test_individual_organization_never_merge() {
        let schema = sample_schema();
        let mut batch = DataBatch::new();
        batch.push(
            "Individual",
            Row::from([
                ("id".to_string(), "t-a".to_string()),
                ("full_name".to_string(), "jordan acme".to_string()),
                ("reported_state".to_string(), "IL".to_string()),
            ]),
        );
        batch.push("Organization", org_row("t-b", "jordan acme", "IL"));

        let resolver = EntityResolver::new(&schema);
        let outcome = resolver.resolve(&mut batch).unwrap();

        assert_eq!(outcome.merges, 0);
        assert_eq!(batch.rows("Individual").len(), 1);
        assert_eq!(batch.rows("Organization").len(), 1);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let schema = sample_schema();
        let mut batch = DataBatch::new();
        batch.push("Organization", org_row("t-a", "Acme Corp.", "IL"));
        batch.push("Organization", org_row("t-b", "ACME CORP", "IL"));

        let resolver = EntityResolver::new(&schema);
        let first = resolver.resolve(&mut batch).unwrap();
        assert_eq!(first.merges, 1);

        let second = resolver.resolve(&mut batch).unwrap();
        assert_eq!(second.merges, 0);
        assert_eq!(batch.rows("Organization").len(), 1);
    }

    #[test]
    fn test_longest_field_wins_in_canonical_row() {
        let schema = sample_schema();
        let mut batch = DataBatch::new();
        let mut short = org_row("t-a", "Acme Corp", "IL");
        short.insert("naics".to_string(), String::new());
        let mut long = org_row("t-b", "Acme Corporation", "IL");
        long.insert("naics".to_string(), "541511".to_string());
        batch.push("Organization", short);
        batch.push("Organization", long);

        let resolver = EntityResolver::new(&schema);
        resolver.resolve(&mut batch).unwrap();

        let row = &batch.rows("Organization")[0];
        assert_eq!(row["id"], "t-a");
        assert_eq!(row["full_name"], "Acme Corporation");
        assert_eq!(row["naics"], "541511");
    }

    #[test]
    fn test_oversized_block_skipped_and_counted() {
        let schema = sample_schema();
        let mut batch = DataBatch::new();
        for i in 0..10 {
            batch.push("Organization", org_row(&format!("t-{:02}", i), "Acme", "IL"));
        }

        let mut resolver = EntityResolver::new(&schema);
        resolver.block_cap = 5;
        let outcome = resolver.resolve(&mut batch).unwrap();

        assert_eq!(outcome.merges, 0);
        assert_eq!(outcome.overflowed_blocks(), 1);
        assert!(matches!(
            outcome.errors[0],
            ResolutionError::BlockingOverflow { size: 10, cap: 5, .. }
        ));
        assert_eq!(batch.rows("Organization").len(), 10);
    }
}

//! Query-flag parsing and the two-step filter pipeline
//!
//! Parses the xRegistry listing flags (`filter`, `sort`, `inline`, `limit`,
//! `offset`, `doc`, ...) and applies them to a stream of candidate names.
//! Filters on attributes the name catalog cannot answer require a
//! per-entity upstream fetch; those fetches are bounded by a budget and a
//! concurrency cap so one query cannot drag an entire upstream into memory.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::StreamExt;
use lru::LruCache;
use regex::Regex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::catalog::adapter::{ResourceMetadata, UpstreamAdapter};
use crate::catalog::name_catalog::NameCatalog;
use crate::errors::{RegistryError, RegistryResult};
use crate::models::SPECVERSION;

/// Operators admitted by the filter grammar. Anything richer (`<`, `>`,
/// presence-only) is rejected with `capability_error` until the upstream
/// specification firms up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Ne,
}

/// One parsed `filter=` clause.
#[derive(Debug, Clone)]
pub struct FilterClause {
    pub attr: String,
    pub op: FilterOp,
    pub pattern: String,
    matcher: Option<Regex>,
}

impl FilterClause {
    fn new(attr: String, op: FilterOp, pattern: String) -> RegistryResult<Self> {
        let matcher = if pattern.contains('*') {
            Some(compile_wildcard(&pattern)?)
        } else {
            None
        };
        Ok(Self {
            attr,
            op,
            pattern,
            matcher,
        })
    }

    /// Whether a candidate attribute value satisfies this clause.
    ///
    /// String comparison is anchored and case-insensitive; `*` matches any
    /// run of characters. A missing attribute never satisfies `=` and
    /// always satisfies `!=`.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let positive = match value {
            None => false,
            Some(value) => match &self.matcher {
                Some(regex) => regex.is_match(&value_as_string(value)),
                None => {
                    if let (Some(num), Ok(wanted)) = (value.as_f64(), self.pattern.parse::<f64>())
                    {
                        num == wanted
                    } else {
                        value_as_string(value).eq_ignore_ascii_case(&self.pattern)
                    }
                }
            },
        };
        match self.op {
            FilterOp::Eq => positive,
            FilterOp::Ne => !positive,
        }
    }

    /// Canonical form used as a cache key component.
    fn normalized(&self) -> String {
        let op = match self.op {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
        };
        format!("{}{}{}", self.attr.to_lowercase(), op, self.pattern.to_lowercase())
    }
}

/// `*` matches any run of characters (including empty); the match is
/// anchored and case-insensitive.
fn compile_wildcard(pattern: &str) -> RegistryResult<Regex> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push_str("(?i)^");
    for ch in pattern.chars() {
        if ch == '*' {
            regex.push_str(".*");
        } else {
            regex.push_str(&regex::escape(&ch.to_string()));
        }
    }
    regex.push('$');
    Regex::new(&regex)
        .map_err(|e| RegistryError::invalid_data(format!("invalid filter pattern '{pattern}': {e}")))
}

/// Project a JSON value to the string the filter grammar compares against.
pub fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse one `filter=` expression: `attr=value` or `attr!=value`.
pub fn parse_filter_expr(expr: &str) -> RegistryResult<FilterClause> {
    if let Some(idx) = expr.find("!=") {
        let (attr, value) = (&expr[..idx], &expr[idx + 2..]);
        return build_clause(expr, attr, FilterOp::Ne, value);
    }
    for op in ["<=", ">=", "<", ">"] {
        if expr.contains(op) {
            return Err(RegistryError::capability(format!(
                "filter operator '{op}' is not supported"
            )));
        }
    }
    match expr.find('=') {
        Some(idx) => {
            let (attr, value) = (&expr[..idx], &expr[idx + 1..]);
            build_clause(expr, attr, FilterOp::Eq, value)
        }
        None => Err(RegistryError::capability(format!(
            "filter expression '{expr}' has no operator"
        ))),
    }
}

fn build_clause(
    expr: &str,
    attr: &str,
    op: FilterOp,
    value: &str,
) -> RegistryResult<FilterClause> {
    if attr.is_empty() {
        return Err(RegistryError::invalid_data(format!(
            "filter expression '{expr}' has no attribute"
        )));
    }
    if value.is_empty() {
        return Err(RegistryError::invalid_data(format!(
            "filter expression '{expr}' has no value"
        )));
    }
    FilterClause::new(attr.to_string(), op, value.to_string())
}

/// Parsed `sort=` flag.
#[derive(Debug, Clone)]
pub struct SortSpec {
    pub attr: String,
    pub descending: bool,
}

pub fn parse_sort_expr(expr: &str) -> RegistryResult<SortSpec> {
    match expr.split_once('=') {
        None => {
            if expr.is_empty() {
                return Err(RegistryError::invalid_data("sort flag has no attribute"));
            }
            Ok(SortSpec {
                attr: expr.to_string(),
                descending: false,
            })
        }
        Some((attr, direction)) => {
            if attr.is_empty() {
                return Err(RegistryError::invalid_data("sort flag has no attribute"));
            }
            let descending = match direction {
                "asc" => false,
                "desc" => true,
                other => {
                    return Err(RegistryError::invalid_data(format!(
                        "sort direction must be 'asc' or 'desc', got '{other}'"
                    )));
                }
            };
            Ok(SortSpec {
                attr: attr.to_string(),
                descending,
            })
        }
    }
}

/// Parsed `inline=` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineSpec {
    All,
    Set(Vec<String>),
}

impl InlineSpec {
    pub fn includes(&self, token: &str) -> bool {
        match self {
            Self::All => true,
            Self::Set(tokens) => tokens.iter().any(|t| t == token),
        }
    }
}

/// Every query flag a listing or read endpoint recognises. Unknown flags
/// are rejected at parse time with `capability_error`.
#[derive(Debug, Clone, Default)]
pub struct ListFlags {
    pub filters: Vec<FilterClause>,
    pub sort: Option<SortSpec>,
    pub inline: Option<InlineSpec>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub doc: bool,
    pub epoch: bool,
    pub noepoch: bool,
    pub noreadonly: bool,
    pub nodefaultversionid: bool,
    pub nodefaultversionsticky: bool,
    pub collections: bool,
    pub schema: Option<String>,
    pub specversion: Option<String>,
}

impl ListFlags {
    /// Parse a raw query string (`filter` may repeat, so this cannot go
    /// through a plain serde map).
    pub fn from_query(query: Option<&str>) -> RegistryResult<Self> {
        let mut flags = Self::default();
        let Some(query) = query else {
            return Ok(flags);
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let key = key.as_ref();
            let value = value.as_ref();
            match key {
                "filter" => flags.filters.push(parse_filter_expr(value)?),
                "sort" => flags.sort = Some(parse_sort_expr(value)?),
                "inline" => {
                    flags.inline = Some(if value.is_empty() || value.split(',').any(|t| t == "*") {
                        InlineSpec::All
                    } else {
                        InlineSpec::Set(
                            value.split(',').map(|t| t.trim().to_string()).collect(),
                        )
                    });
                }
                "limit" => {
                    let limit: usize = value.parse().map_err(|_| {
                        RegistryError::invalid_data(format!("limit must be an integer, got '{value}'"))
                    })?;
                    if limit == 0 {
                        return Err(RegistryError::invalid_data("limit must be >= 1"));
                    }
                    flags.limit = Some(limit);
                }
                "offset" => {
                    flags.offset = value.parse().map_err(|_| {
                        RegistryError::invalid_data(format!(
                            "offset must be a non-negative integer, got '{value}'"
                        ))
                    })?;
                }
                "doc" => flags.doc = flag_enabled(value),
                "epoch" => flags.epoch = flag_enabled(value),
                "noepoch" => flags.noepoch = flag_enabled(value),
                "noreadonly" => flags.noreadonly = flag_enabled(value),
                "nodefaultversionid" => flags.nodefaultversionid = flag_enabled(value),
                "nodefaultversionsticky" => flags.nodefaultversionsticky = flag_enabled(value),
                "collections" => flags.collections = flag_enabled(value),
                "schema" => {
                    if !value.starts_with("xRegistry-json") {
                        return Err(RegistryError::invalid_data(format!(
                            "unsupported schema '{value}'"
                        )));
                    }
                    flags.schema = Some(value.to_string());
                }
                "specversion" => {
                    if value != SPECVERSION {
                        return Err(RegistryError::invalid_data(format!(
                            "unsupported specversion '{value}', this registry serves {SPECVERSION}"
                        )));
                    }
                    flags.specversion = Some(value.to_string());
                }
                unknown => {
                    return Err(RegistryError::capability(format!(
                        "unknown query flag '{unknown}'"
                    )));
                }
            }
        }

        Ok(flags)
    }

    /// Cache key for the prefiltered candidate set: the normalised filter
    /// tuple, order-insensitive.
    pub fn candidate_cache_key(&self) -> String {
        let mut parts: Vec<String> = self.filters.iter().map(|c| c.normalized()).collect();
        parts.sort();
        parts.join("&")
    }
}

fn flag_enabled(value: &str) -> bool {
    !value.eq_ignore_ascii_case("false")
}

/// One candidate flowing through the pipeline; metadata is attached once
/// the candidate has been enriched.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub metadata: Option<Arc<ResourceMetadata>>,
}

impl Candidate {
    fn attribute(&self, attr: &str, name_attrs: &[&str]) -> Option<Value> {
        if name_attrs.contains(&attr) {
            return Some(Value::String(self.name.clone()));
        }
        self.metadata
            .as_ref()
            .and_then(|m| m.attribute(attr).cloned())
    }
}

/// Result of one pipeline run: the requested page plus pagination facts.
#[derive(Debug)]
pub struct SelectedPage {
    pub items: Vec<Candidate>,
    /// Total matches observed after filtering (exact unless `truncated`).
    pub total: usize,
    pub has_more: bool,
    pub next_offset: usize,
    /// True when the fetch budget ended the walk before all candidates
    /// were examined; `total` is then a lower bound.
    pub truncated: bool,
}

/// Tuning knobs for the pipeline, sourced from `[engine]` config.
#[derive(Debug, Clone)]
pub struct FilterBudget {
    /// Maximum per-request metadata fetches during enrichment.
    pub max_metadata_fetches: usize,
    /// Per-request enrichment parallelism.
    pub fetch_concurrency: usize,
    /// Candidate-set cache capacity.
    pub cache_size: usize,
    /// Candidate-set cache TTL.
    pub cache_ttl: Duration,
}

impl Default for FilterBudget {
    fn default() -> Self {
        Self {
            max_metadata_fetches: 30,
            fetch_concurrency: 8,
            cache_size: 2000,
            cache_ttl: Duration::from_secs(600),
        }
    }
}

/// The two-step filter pipeline: cheap name-catalog prefilter, then
/// budget-bounded metadata enrichment, then postfilter + sort + page.
pub struct FilterEngine {
    budget: FilterBudget,
    /// Process-wide cap on concurrent upstream fetches.
    global_fetches: Arc<Semaphore>,
    /// Prefiltered candidate sets keyed by the normalised filter tuple.
    candidates: Mutex<LruCache<String, (Instant, Arc<Vec<String>>)>>,
}

impl FilterEngine {
    pub fn new(budget: FilterBudget, global_fetches: Arc<Semaphore>) -> Self {
        let capacity = NonZeroUsize::new(budget.cache_size.max(1)).expect("max(1) is non-zero");
        Self {
            budget,
            global_fetches,
            candidates: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Run the pipeline for one listing request.
    ///
    /// `name_attrs` are the attributes answerable from the name catalog
    /// alone (e.g. `name`, `packageid`); clauses on anything else trigger
    /// enrichment. `filterable_attrs` is the full vocabulary; clauses and
    /// sort keys outside it are `capability_error`.
    pub async fn select(
        &self,
        catalog: &NameCatalog,
        adapter: &dyn UpstreamAdapter,
        flags: &ListFlags,
        name_attrs: &[&str],
        filterable_attrs: &[&str],
        limit: usize,
    ) -> RegistryResult<SelectedPage> {
        for clause in &flags.filters {
            if !filterable_attrs.contains(&clause.attr.as_str()) {
                return Err(RegistryError::capability(format!(
                    "unknown filter attribute '{}'",
                    clause.attr
                )));
            }
        }
        if let Some(sort) = &flags.sort {
            if !filterable_attrs.contains(&sort.attr.as_str()) {
                return Err(RegistryError::capability(format!(
                    "unknown sort attribute '{}'",
                    sort.attr
                )));
            }
        }

        let (name_clauses, enrich_clauses): (Vec<_>, Vec<_>) = flags
            .filters
            .iter()
            .cloned()
            .partition(|c| name_attrs.contains(&c.attr.as_str()));

        let candidates = self
            .prefilter(catalog, adapter, flags, &name_clauses, &enrich_clauses)
            .await?;

        let sort_needs_metadata = flags
            .sort
            .as_ref()
            .map(|s| !name_attrs.contains(&s.attr.as_str()))
            .unwrap_or(false);

        if enrich_clauses.is_empty() && !sort_needs_metadata {
            return self
                .page_by_name(adapter, flags, candidates.as_slice(), limit)
                .await;
        }

        self.enrich_and_page(
            adapter,
            flags,
            candidates.as_slice(),
            &enrich_clauses,
            name_attrs,
            limit,
        )
        .await
    }

    /// Step 1: narrow the candidate name set without touching per-entity
    /// metadata. Cached by normalised filter tuple.
    async fn prefilter(
        &self,
        catalog: &NameCatalog,
        adapter: &dyn UpstreamAdapter,
        flags: &ListFlags,
        name_clauses: &[FilterClause],
        enrich_clauses: &[FilterClause],
    ) -> RegistryResult<Arc<Vec<String>>> {
        let key = flags.candidate_cache_key();
        if !key.is_empty() {
            let mut cache = self.candidates.lock().expect("candidate cache lock poisoned");
            let fresh = cache.get(&key).and_then(|(inserted, names)| {
                (inserted.elapsed() < self.budget.cache_ttl).then(|| names.clone())
            });
            match fresh {
                Some(names) => {
                    debug!(%key, "candidate cache hit");
                    return Ok(names);
                }
                None => {
                    cache.pop(&key);
                }
            }
        }

        let names: Vec<String> = if name_clauses.is_empty() {
            // No catalog-answerable clause. Try the upstream's search
            // service to narrow the walk before enrichment.
            let narrowed = match enrich_clauses.first() {
                Some(clause) => {
                    let query = clause.pattern.replace('*', "");
                    if query.is_empty() {
                        None
                    } else {
                        adapter.search(&query).await.unwrap_or_else(|e| {
                            warn!(error = %e, "search narrowing failed, walking full catalog");
                            None
                        })
                    }
                }
                None => None,
            };
            match narrowed {
                Some(hits) => {
                    let mut names: Vec<String> = hits
                        .into_iter()
                        .filter_map(|n| catalog.canonical(&n))
                        .collect();
                    names.sort();
                    names.dedup();
                    names
                }
                None => catalog.snapshot().names().to_vec(),
            }
        } else {
            let pred = |name: &str| {
                name_clauses
                    .iter()
                    .all(|c| c.matches(Some(&Value::String(name.to_string()))))
            };
            let (names, _) = catalog.list(0, usize::MAX, Some(&pred));
            names
        };

        let names = Arc::new(names);
        if !key.is_empty() {
            self.candidates
                .lock()
                .expect("candidate cache lock poisoned")
                .put(key, (Instant::now(), names.clone()));
        }
        Ok(names)
    }

    /// Fast path: every clause was answerable from the catalog. The page is
    /// sliced first and only the page items are enriched (for attribute
    /// emission); a failed fetch degrades that item to a name-only entity
    /// rather than failing the listing.
    async fn page_by_name(
        &self,
        adapter: &dyn UpstreamAdapter,
        flags: &ListFlags,
        candidates: &[String],
        limit: usize,
    ) -> RegistryResult<SelectedPage> {
        let mut ordered: Vec<&String> = candidates.iter().collect();
        if let Some(sort) = &flags.sort {
            // Sort key is a name attribute here.
            ordered.sort_by(|a, b| {
                let cmp = fold_case(a).cmp(&fold_case(b));
                if sort.descending { cmp.reverse() } else { cmp }
            });
        }

        let total = ordered.len();
        let page_names: Vec<String> = ordered
            .into_iter()
            .skip(flags.offset)
            .take(limit)
            .cloned()
            .collect();

        let mut items = Vec::with_capacity(page_names.len());
        let fetched = self
            .fetch_many(adapter, page_names.iter().cloned().collect::<Vec<_>>())
            .await;
        for name in page_names {
            let metadata = fetched.get(&name).cloned();
            items.push(Candidate { name, metadata });
        }

        let next_offset = flags.offset + items.len();
        Ok(SelectedPage {
            has_more: next_offset < total,
            next_offset,
            total,
            items,
            truncated: false,
        })
    }

    /// Step 2 + 3: bounded enrichment walk, postfilter, sort, page.
    async fn enrich_and_page(
        &self,
        adapter: &dyn UpstreamAdapter,
        flags: &ListFlags,
        candidates: &[String],
        enrich_clauses: &[FilterClause],
        name_attrs: &[&str],
        limit: usize,
    ) -> RegistryResult<SelectedPage> {
        let wanted = flags.offset + limit;
        let window: Vec<String> = candidates
            .iter()
            .take(self.budget.max_metadata_fetches)
            .cloned()
            .collect();
        let truncated = candidates.len() > window.len();
        let examined = window.len();

        let mut fetch_errors = 0usize;
        let fetched = self.fetch_many(adapter, window.clone()).await;

        let mut matches: Vec<Candidate> = Vec::new();
        for name in window {
            let Some(metadata) = fetched.get(&name) else {
                fetch_errors += 1;
                continue;
            };
            let candidate = Candidate {
                name,
                metadata: Some(metadata.clone()),
            };
            let ok = enrich_clauses
                .iter()
                .all(|c| c.matches(candidate.attribute(&c.attr, name_attrs).as_ref()));
            if ok {
                matches.push(candidate);
            }
        }

        // An enrichment failure only fails the response when the page could
        // not be satisfied from the candidates that did enrich.
        if matches.len() < wanted && fetch_errors > 0 {
            return Err(RegistryError::unavailable(format!(
                "{fetch_errors} of {examined} metadata fetches failed before the page was satisfied"
            )));
        }
        // Budget exhausted with no partial answer at all.
        if truncated && matches.is_empty() && examined > 0 {
            return Err(RegistryError::unavailable(format!(
                "metadata fetch budget ({examined}) exhausted before any candidate matched"
            )));
        }

        sort_candidates(&mut matches, flags.sort.as_ref(), name_attrs);

        let total = matches.len();
        let items: Vec<Candidate> = matches
            .into_iter()
            .skip(flags.offset)
            .take(limit)
            .collect();
        let next_offset = flags.offset + items.len();

        Ok(SelectedPage {
            has_more: next_offset < total || truncated,
            next_offset,
            total,
            items,
            truncated,
        })
    }

    /// Fetch metadata for a set of names with bounded parallelism, sharing
    /// the process-wide fetch semaphore. Failures are logged and omitted.
    async fn fetch_many(
        &self,
        adapter: &dyn UpstreamAdapter,
        names: Vec<String>,
    ) -> HashMap<String, Arc<ResourceMetadata>> {
        let results: Vec<Option<(String, Arc<ResourceMetadata>)>> =
            futures::stream::iter(names.into_iter().map(|name| {
                let semaphore = self.global_fetches.clone();
                async move {
                    let _permit = semaphore.acquire_owned().await.ok()?;
                    match adapter.fetch_resource(&name).await {
                        Ok(metadata) => Some((name, Arc::new(metadata))),
                        Err(e) => {
                            debug!(%name, error = %e, "metadata fetch failed");
                            None
                        }
                    }
                }
            }))
            .buffered(self.budget.fetch_concurrency.max(1))
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }
}

/// Sort with the spec's comparison rules and a stable `xid` tie-break.
pub fn sort_candidates(
    candidates: &mut [Candidate],
    sort: Option<&SortSpec>,
    name_attrs: &[&str],
) {
    match sort {
        None => candidates.sort_by(|a, b| a.name.cmp(&b.name)),
        Some(spec) => {
            candidates.sort_by(|a, b| {
                let av = a.attribute(&spec.attr, name_attrs);
                let bv = b.attribute(&spec.attr, name_attrs);
                compare_sort_values(av.as_ref(), bv.as_ref(), spec.descending)
                    .then_with(|| a.name.cmp(&b.name))
            });
        }
    }
}

/// Missing attributes sort last ascending, first descending. Numbers
/// compare as IEEE 754 doubles when both sides are numeric; strings
/// compare code-point-wise with ASCII case folding.
fn compare_sort_values(
    a: Option<&Value>,
    b: Option<&Value>,
    descending: bool,
) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let ordering = match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => return if descending { Ordering::Less } else { Ordering::Greater },
        (Some(_), None) => return if descending { Ordering::Greater } else { Ordering::Less },
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => fold_case(&value_as_string(a)).cmp(&fold_case(&value_as_string(b))),
        },
    };
    if descending { ordering.reverse() } else { ordering }
}

fn fold_case(s: &str) -> String {
    s.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_eq_and_ne() {
        let eq = parse_filter_expr("name=express").unwrap();
        assert_eq!(eq.op, FilterOp::Eq);
        assert_eq!(eq.attr, "name");

        let ne = parse_filter_expr("license!=MIT").unwrap();
        assert_eq!(ne.op, FilterOp::Ne);
        assert_eq!(ne.pattern, "MIT");
    }

    #[test]
    fn rejects_rich_operators() {
        for expr in ["downloads>100", "downloads<100", "downloads>=1", "downloads<=1"] {
            let err = parse_filter_expr(expr).unwrap_err();
            assert_eq!(err.code(), "capability_error", "{expr}");
        }
        assert_eq!(
            parse_filter_expr("name").unwrap_err().code(),
            "capability_error"
        );
    }

    #[test]
    fn rejects_empty_parts() {
        assert_eq!(parse_filter_expr("=x").unwrap_err().code(), "invalid_data");
        assert_eq!(parse_filter_expr("name=").unwrap_err().code(), "invalid_data");
    }

    #[test]
    fn wildcard_is_anchored_and_case_insensitive() {
        let clause = parse_filter_expr("name=*azure*").unwrap();
        assert!(clause.matches(Some(&json!("Azure-storage"))));
        assert!(clause.matches(Some(&json!("my-AZURE"))));
        assert!(!clause.matches(Some(&json!("cloud"))));

        let anchored = parse_filter_expr("name=azure*").unwrap();
        assert!(anchored.matches(Some(&json!("azure-core"))));
        assert!(!anchored.matches(Some(&json!("not-azure"))));
    }

    #[test]
    fn equality_is_case_insensitive() {
        let clause = parse_filter_expr("license=mit").unwrap();
        assert!(clause.matches(Some(&json!("MIT"))));
        assert!(!clause.matches(None));
    }

    #[test]
    fn ne_on_missing_attribute_matches() {
        let clause = parse_filter_expr("license!=MIT").unwrap();
        assert!(clause.matches(None));
        assert!(!clause.matches(Some(&json!("MIT"))));
        assert!(clause.matches(Some(&json!("Apache-2.0"))));
    }

    #[test]
    fn numeric_equality() {
        let clause = parse_filter_expr("stars=10").unwrap();
        assert!(clause.matches(Some(&json!(10))));
        assert!(clause.matches(Some(&json!(10.0))));
        assert!(!clause.matches(Some(&json!(11))));
    }

    #[test]
    fn sort_expr_parsing() {
        let plain = parse_sort_expr("name").unwrap();
        assert!(!plain.descending);
        let desc = parse_sort_expr("name=desc").unwrap();
        assert!(desc.descending);
        assert_eq!(parse_sort_expr("name=up").unwrap_err().code(), "invalid_data");
    }

    #[test]
    fn flags_parse_and_reject_unknown() {
        let flags =
            ListFlags::from_query(Some("filter=name%3D*a*&filter=license%3DMIT&sort=name%3Ddesc&limit=10&offset=20"))
                .unwrap();
        assert_eq!(flags.filters.len(), 2);
        assert_eq!(flags.limit, Some(10));
        assert_eq!(flags.offset, 20);
        assert!(flags.sort.unwrap().descending);

        assert_eq!(
            ListFlags::from_query(Some("frobnicate=1")).unwrap_err().code(),
            "capability_error"
        );
    }

    #[test]
    fn limit_zero_is_invalid() {
        assert_eq!(
            ListFlags::from_query(Some("limit=0")).unwrap_err().code(),
            "invalid_data"
        );
    }

    #[test]
    fn specversion_mismatch_is_invalid() {
        assert!(ListFlags::from_query(Some("specversion=1.0-rc2")).is_ok());
        assert_eq!(
            ListFlags::from_query(Some("specversion=0.5")).unwrap_err().code(),
            "invalid_data"
        );
    }

    #[test]
    fn inline_star_and_list() {
        let all = ListFlags::from_query(Some("inline=*")).unwrap();
        assert_eq!(all.inline, Some(InlineSpec::All));

        let some = ListFlags::from_query(Some("inline=capabilities,modelsource")).unwrap();
        let spec = some.inline.unwrap();
        assert!(spec.includes("capabilities"));
        assert!(!spec.includes("versions"));
    }

    #[test]
    fn cache_key_is_order_insensitive() {
        let a = ListFlags::from_query(Some("filter=name%3Dx&filter=license%3DMIT")).unwrap();
        let b = ListFlags::from_query(Some("filter=license%3DMIT&filter=name%3Dx")).unwrap();
        assert_eq!(a.candidate_cache_key(), b.candidate_cache_key());
    }

    #[test]
    fn sort_missing_values_last_ascending() {
        let mk = |name: &str, license: Option<&str>| Candidate {
            name: name.to_string(),
            metadata: Some(Arc::new(ResourceMetadata {
                resource_id: name.to_string(),
                attributes: license
                    .map(|l| {
                        let mut m = std::collections::BTreeMap::new();
                        m.insert("license".to_string(), json!(l));
                        m
                    })
                    .unwrap_or_default(),
                versions: vec![],
                default_version: None,
                etag: None,
            })),
        };

        let mut candidates = vec![mk("b", None), mk("a", Some("MIT")), mk("c", Some("Apache"))];
        sort_candidates(
            &mut candidates,
            Some(&SortSpec {
                attr: "license".to_string(),
                descending: false,
            }),
            &["name"],
        );
        let names: Vec<_> = candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);

        let mut candidates = vec![mk("b", None), mk("a", Some("MIT")), mk("c", Some("Apache"))];
        sort_candidates(
            &mut candidates,
            Some(&SortSpec {
                attr: "license".to_string(),
                descending: true,
            }),
            &["name"],
        );
        let names: Vec<_> = candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn sort_ties_break_on_name() {
        let mk = |name: &str| Candidate {
            name: name.to_string(),
            metadata: None,
        };
        let mut candidates = vec![mk("z"), mk("a"), mk("m")];
        sort_candidates(
            &mut candidates,
            Some(&SortSpec {
                attr: "license".to_string(),
                descending: false,
            }),
            &["name"],
        );
        let names: Vec<_> = candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "m", "z"]);
    }
}

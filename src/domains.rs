//! Link domain extraction and canonicalization.
//!
//! Free text is scanned for `http(s)://…` and bare `www.…` links. Each
//! candidate goes through:
//!
//! 1. **Validity gate**: must parse with a scheme and a host, no spaces
//! 2. **Decoding**: percent-encoding is undone so encoded hosts still resolve
//! 3. **Registrable domain**: `domain.suffix`, except that hosts under
//!    `lacounty.gov`, `lacity.gov` and `ca.gov` keep their full host so
//!    agencies stay distinguishable
//! 4. **Alias collapse**: short links and regional variants map to one
//!    canonical domain, either through [`DomainMapping`] or by matching the
//!    first label against a known `.com` domain
//! 5. **Shape gate**: blacklisted tokens and malformed names are dropped
//!
//! A candidate that fails any step is dropped with a `debug` log line; it
//! never fails the batch. [`DomainReport`] aggregates the results of a whole
//! table.

use crate::error::TableError;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use tldextract::{TldExtractor, TldOption};
use tracing::{debug, info, instrument};
use url::Url;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"]+|www\.[^\s<>"]+"#).unwrap());

static SCHEME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").unwrap());

static DOMAIN_SHAPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{1,63}$").unwrap()
});

const MAX_DOMAIN_LEN: usize = 253;

/// Government domains whose sub-agency hosts are kept whole.
const FULL_HOST_DOMAINS: &[&str] = &["lacounty.gov", "lacity.gov", "ca.gov"];

const BLACKLIST: &[&str] = &["file", "www", "http", "https"];

/// Prose punctuation that commonly trails a link in free text.
const TRAILING_PUNCTUATION: &[char] = &[',', '.', ';', ':', '!', '?'];

/// Public Suffix List lookups, ICANN section only.
static SUFFIXES: Lazy<TldExtractor> = Lazy::new(|| TldExtractor::new(TldOption::default()));

/// Short-link and regional domains mapped to their canonical domain.
///
/// Lookups are case-insensitive and entries keep their insertion order, which
/// is also the order name-based collapsing searches in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainMapping {
    entries: Vec<(String, String)>,
}

impl Default for DomainMapping {
    fn default() -> Self {
        Self::from_pairs([
            ("youtu.be", "youtube.com"),
            ("redd.it", "reddit.com"),
            ("gofundme.org", "gofundme.com"),
            ("bbc.co.uk", "bbc.com"),
            ("dailymail.co.uk", "dailymail.com"),
            ("businessinsider.in", "businessinsider.com"),
            ("goo.gl", "google.com"),
        ])
    }
}

impl DomainMapping {
    pub fn from_pairs<K: Into<String>, V: Into<String>>(
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let mut mapping = Self {
            entries: Vec::new(),
        };
        mapping.extend(pairs);
        mapping
    }

    /// Add entries; an existing key takes the new value in place.
    pub fn extend<K: Into<String>, V: Into<String>>(&mut self, pairs: impl IntoIterator<Item = (K, V)>) {
        for (from, to) in pairs {
            let from = from.into().to_lowercase();
            let to = to.into().to_lowercase();
            match self.entries.iter_mut().find(|(k, _)| *k == from) {
                Some(entry) => entry.1 = to,
                None => self.entries.push((from, to)),
            }
        }
    }

    pub fn get(&self, domain: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(domain))
            .map(|(_, v)| v.as_str())
    }

    pub fn canonical_domains(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, v)| v.as_str())
    }
}

/// Extracts canonical domains from free text.
#[derive(Debug, Clone, Default)]
pub struct DomainNormalizer {
    mapping: DomainMapping,
}

impl DomainNormalizer {
    pub fn new(mapping: DomainMapping) -> Self {
        Self { mapping }
    }

    /// Canonical domains of every acceptable link in `text`, in order of
    /// appearance.
    pub fn extract_domains(&self, text: &str) -> Vec<String> {
        URL_RE
            .find_iter(text)
            .filter_map(|m| self.normalize_url(m.as_str()))
            .collect()
    }

    /// Run one candidate link through every step; `None` when it is dropped.
    pub fn normalize_url(&self, candidate: &str) -> Option<String> {
        let candidate = candidate.trim_end_matches(TRAILING_PUNCTUATION);
        let provisional: Cow<'_, str> = if SCHEME_RE.is_match(candidate) {
            Cow::Borrowed(candidate)
        } else {
            Cow::Owned(format!("http://{candidate}"))
        };
        if !is_valid_url(&provisional) {
            debug!(url = %candidate, "Dropping unparseable link");
            return None;
        }

        let decoded = percent_decode(&provisional);
        let Some(host) = extract_host(&decoded) else {
            debug!(url = %candidate, "Dropping link without host");
            return None;
        };

        let Some(domain) = registrable_domain(&host) else {
            debug!(url = %candidate, %host, "Dropping host without registrable domain");
            return None;
        };
        let domain = self.resolve_alias(domain);
        if is_valid_domain(&domain) {
            Some(domain)
        } else {
            debug!(url = %candidate, %domain, "Dropping malformed domain");
            None
        }
    }

    /// Apply the explicit mapping, then name-based collapse onto `.com`.
    pub fn resolve_alias(&self, domain: String) -> String {
        if let Some(canonical) = self.mapping.get(&domain) {
            return canonical.to_string();
        }
        self.collapse_to_com(domain)
    }

    fn collapse_to_com(&self, domain: String) -> String {
        let lower = domain.to_lowercase();
        if lower.ends_with(".com") {
            return domain;
        }
        let Some((name, _)) = lower.split_once('.') else {
            return domain;
        };
        let prefix = format!("{name}.");
        self.mapping
            .canonical_domains()
            .find(|known| known.starts_with(&prefix) && known.ends_with(".com"))
            .map(String::from)
            .unwrap_or(domain)
    }

    /// Count domains across `text_columns` of a CSV table.
    ///
    /// Unreadable rows are skipped; a missing file is an error.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn normalize_table(
        &self,
        path: &Path,
        text_columns: &[String],
    ) -> Result<DomainReport, TableError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => TableError::NotFound(path.to_path_buf()),
            _ => TableError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let headers = rdr
            .headers()
            .map_err(|source| TableError::Csv {
                path: path.to_path_buf(),
                source,
            })?
            .clone();
        let columns: Vec<usize> = text_columns
            .iter()
            .filter_map(|c| headers.iter().position(|h| h == c))
            .collect();

        let mut domains = Vec::new();
        let mut rows = 0usize;
        for (i, record) in rdr.records().enumerate() {
            match record {
                Ok(record) => {
                    rows += 1;
                    for &idx in &columns {
                        if let Some(text) = record.get(idx) {
                            domains.extend(self.extract_domains(text));
                        }
                    }
                }
                Err(e) => debug!(row = i, error = %e, "Skipping unreadable row"),
            }
        }

        let report = DomainReport::from_domains(domains);
        info!(rows, unique = report.unique().len(), "Normalized link domains");
        Ok(report)
    }
}

/// Structure check: scheme and host present, no embedded space.
fn is_valid_url(url: &str) -> bool {
    if url.contains(' ') {
        return false;
    }
    match Url::parse(url) {
        Ok(parsed) => !parsed.scheme().is_empty() && parsed.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}

fn percent_decode(url: &str) -> Cow<'_, str> {
    match urlencoding::decode(url) {
        Ok(decoded) => decoded,
        Err(_) => Cow::Owned(String::from_utf8_lossy(&urlencoding::decode_binary(url.as_bytes())).into_owned()),
    }
}

/// Lowercased host of a decoded URL, without userinfo, port or trailing dot.
fn extract_host(url: &str) -> Option<String> {
    let rest = match SCHEME_RE.find(url) {
        Some(m) => &url[m.end()..],
        None => url,
    };
    let authority = rest
        .split(|c: char| matches!(c, '/' | '?' | '#' | '\\') || c.is_whitespace())
        .next()
        .unwrap_or("");
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = match host_port.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => host_port,
    };
    let host = host.trim_end_matches('.').to_lowercase();
    (!host.is_empty()).then_some(host)
}

/// `domain.suffix` of a host, or the full host (minus a leading `www.`) for
/// the government domains that keep sub-agency hosts.
///
/// Hosts whose last label is not alphabetic (IP addresses) come back whole so
/// the shape gate rejects them. `None` when the host is itself a public
/// suffix.
fn registrable_domain(host: &str) -> Option<String> {
    let last = host.rsplit('.').next().unwrap_or(host);
    if !host.contains('.') || !last.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(host.to_string());
    }

    let parts = match SUFFIXES.extract(&format!("http://{host}/")) {
        Ok(parts) => parts,
        Err(e) => {
            debug!(%host, error = %e, "Suffix lookup failed");
            return None;
        }
    };
    let registrable = match (parts.domain, parts.suffix) {
        (Some(domain), Some(suffix)) if !domain.is_empty() => format!("{domain}.{suffix}"),
        (Some(domain), None) if !domain.is_empty() => domain,
        _ => return None,
    };

    if FULL_HOST_DOMAINS.contains(&registrable.as_str()) {
        Some(host.strip_prefix("www.").unwrap_or(host).to_string())
    } else {
        Some(registrable)
    }
}

/// Reject parentheses, bare scheme/host tokens and malformed names.
pub fn is_valid_domain(domain: &str) -> bool {
    if domain.contains(')') {
        return false;
    }
    if BLACKLIST.iter().any(|b| domain.eq_ignore_ascii_case(b)) {
        return false;
    }
    domain.len() <= MAX_DOMAIN_LEN && DOMAIN_SHAPE_RE.is_match(domain)
}

/// Domain occurrence counts for one normalization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainReport {
    frequencies: Vec<(String, usize)>,
    unique: Vec<String>,
}

impl DomainReport {
    pub fn from_domains(domains: impl IntoIterator<Item = String>) -> Self {
        let domains: Vec<String> = domains.into_iter().collect();
        let unique: Vec<String> = domains
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let frequencies = domains
            .into_iter()
            .counts()
            .into_iter()
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
            .collect();
        Self {
            frequencies,
            unique,
        }
    }

    /// `(domain, count)` by descending count, ties by domain name.
    pub fn frequencies(&self) -> &[(String, usize)] {
        &self.frequencies
    }

    /// Distinct domains in ascending order.
    pub fn unique(&self) -> &[String] {
        &self.unique
    }

    pub fn write_frequencies(&self, path: &Path) -> Result<(), TableError> {
        let mut table = crate::table::Table::new(["Domain", "Count"]);
        for (domain, count) in &self.frequencies {
            let count = count.to_string();
            table.push_named([("Domain", domain.as_str()), ("Count", count.as_str())]);
        }
        table.store(path)
    }

    pub fn write_unique(&self, path: &Path) -> Result<(), TableError> {
        let mut table = crate::table::Table::new(["Unique_Domain"]);
        for domain in &self.unique {
            table.push_named([("Unique_Domain", domain.as_str())]);
        }
        table.store(path)
    }
}

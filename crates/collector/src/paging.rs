//! Pagination metadata carried in the `Link` response header.
//!
//! ```text
//! <https://api.github.com/repositories/1/actions/runs?page=2&per_page=100>; rel="next",
//! <https://api.github.com/repositories/1/actions/runs?page=5&per_page=100>; rel="last"
//! ```

use url::Url;

use crate::error::CollectorError;

/// Page numbers for each relation present in a `Link` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PagingInfo {
    pub first: Option<u32>,
    pub prev: Option<u32>,
    pub next: Option<u32>,
    pub last: Option<u32>,
}

/// Parse a `Link` header into page numbers.
///
/// Unknown relations are ignored. A malformed entry, or a known relation
/// whose URL lacks a numeric `page` parameter, is an error.
pub fn parse_link_header(header: &str) -> Result<PagingInfo, CollectorError> {
    // Relative targets are resolved against a throwaway base.
    let base = Url::parse("http://localhost/")?;
    let mut info = PagingInfo::default();

    for entry in header.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (target, params) = entry
            .strip_prefix('<')
            .and_then(|rest| rest.split_once('>'))
            .ok_or_else(|| CollectorError::Paging(format!("expected <url> in {entry:?}")))?;

        let rel = params
            .split(';')
            .map(str::trim)
            .find_map(|p| p.strip_prefix("rel="))
            .map(|r| r.trim_matches('"'))
            .ok_or_else(|| CollectorError::Paging(format!("missing rel in {entry:?}")))?;

        let slot = match rel {
            "first" => &mut info.first,
            "prev" => &mut info.prev,
            "next" => &mut info.next,
            "last" => &mut info.last,
            _ => continue,
        };

        let url = base
            .join(target)
            .map_err(|e| CollectorError::Paging(format!("bad url {target:?}: {e}")))?;
        let page = url
            .query_pairs()
            .find(|(k, _)| k == "page")
            .ok_or_else(|| CollectorError::Paging(format!("no page parameter in {target:?}")))?
            .1
            .parse::<u32>()
            .map_err(|e| CollectorError::Paging(format!("bad page number in {target:?}: {e}")))?;
        *slot = Some(page);
    }

    Ok(info)
}

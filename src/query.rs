use crate::error::{Error, Result};

/// Largest `page_size` CMR accepts.
pub const MAX_PAGE_SIZE: usize = 2000;

/// A granule search.
///
/// `bounding_box` and `temporal` are kept exactly as given so they are sent
/// to the catalog verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    pub collection_id: String,
    pub bounding_box: Option<String>,
    pub temporal: Option<String>,
    pub page_size: usize,
    /// Stops paging after this many pages.
    pub max_pages: Option<usize>,
}

impl CatalogQuery {
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            bounding_box: None,
            temporal: None,
            page_size: MAX_PAGE_SIZE,
            max_pages: None,
        }
    }

    /// `west,south,east,north` in decimal degrees.
    pub fn bounding_box(mut self, bbox: &str) -> Result<Self> {
        validate_bbox(bbox)?;
        self.bounding_box = Some(bbox.trim().to_string());
        Ok(self)
    }

    /// ISO-8601 `start,end`; either side may be empty for an open range.
    pub fn temporal(mut self, range: &str) -> Result<Self> {
        validate_temporal(range)?;
        self.temporal = Some(range.trim().to_string());
        Ok(self)
    }

    pub fn page_size(mut self, page_size: usize) -> Result<Self> {
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(Error::InvalidQuery(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
            )));
        }
        self.page_size = page_size;
        Ok(self)
    }

    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages.max(1));
        self
    }

    /// Query parameters in the order they are sent.
    pub(crate) fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("concept_id", self.collection_id.clone())];
        if let Some(t) = &self.temporal {
            params.push(("temporal", t.clone()));
        }
        if let Some(b) = &self.bounding_box {
            params.push(("bounding_box", b.clone()));
        }
        params.push(("page_size", self.page_size.to_string()));
        params
    }
}

fn validate_bbox(bbox: &str) -> Result<()> {
    let parts: Vec<&str> = bbox.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(Error::InvalidQuery(format!(
            "bounding box needs 4 comma separated values, got {:?}",
            bbox
        )));
    }

    let mut v = [0f64; 4];
    for (slot, part) in v.iter_mut().zip(&parts) {
        *slot = part
            .parse::<f64>()
            .map_err(|_| Error::InvalidQuery(format!("bounding box value {part:?} is not a number")))?;
    }
    let [west, south, east, north] = v;

    if !(-180.0..=180.0).contains(&west) || !(-180.0..=180.0).contains(&east) {
        return Err(Error::InvalidQuery(format!(
            "bounding box longitudes must be within [-180, 180]: {bbox}"
        )));
    }
    if !(-90.0..=90.0).contains(&south) || !(-90.0..=90.0).contains(&north) {
        return Err(Error::InvalidQuery(format!(
            "bounding box latitudes must be within [-90, 90]: {bbox}"
        )));
    }
    if south > north {
        return Err(Error::InvalidQuery(format!(
            "bounding box south {south} is above north {north}"
        )));
    }
    Ok(())
}

fn validate_temporal(range: &str) -> Result<()> {
    let Some((start, end)) = range.split_once(',') else {
        return Err(Error::InvalidQuery(format!(
            "temporal range must be `start,end`, got {range:?}"
        )));
    };
    let (start, end) = (start.trim(), end.trim());
    if start.is_empty() && end.is_empty() {
        return Err(Error::InvalidQuery("temporal range is empty".to_string()));
    }

    let parsed: Vec<Option<chrono::DateTime<chrono::FixedOffset>>> = [start, end]
        .iter()
        .map(|s| {
            if s.is_empty() {
                Ok(None)
            } else {
                chrono::DateTime::parse_from_rfc3339(s)
                    .map(Some)
                    .map_err(|_| Error::InvalidQuery(format!("{s:?} is not an ISO-8601 timestamp")))
            }
        })
        .collect::<Result<_>>()?;

    if let [Some(s), Some(e)] = parsed.as_slice() {
        if s > e {
            return Err(Error::InvalidQuery(format!(
                "temporal range starts after it ends: {range}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_are_echoed_verbatim() {
        let q = CatalogQuery::new("C2076090826-LPCLOUD")
            .bounding_box("-120.45,34.51,-120.40,34.53")
            .unwrap()
            .temporal("2022-12-01T00:00:00Z,2022-12-07T23:59:59Z")
            .unwrap();
        assert_eq!(
            q.params(),
            vec![
                ("concept_id", "C2076090826-LPCLOUD".to_string()),
                ("temporal", "2022-12-01T00:00:00Z,2022-12-07T23:59:59Z".to_string()),
                ("bounding_box", "-120.45,34.51,-120.40,34.53".to_string()),
                ("page_size", "2000".to_string()),
            ]
        );
    }

    #[test]
    fn page_size_bounds() {
        let q = CatalogQuery::new("C1");
        assert!(q.clone().page_size(0).is_err());
        assert!(q.clone().page_size(2001).is_err());
        assert_eq!(q.page_size(100).unwrap().page_size, 100);
    }

    #[test]
    fn bad_bounding_boxes() {
        let q = CatalogQuery::new("C1");
        // The last one has south above north.
        for bbox in ["1,2,3", "a,2,3,4", "-190,0,10,10", "0,-91,10,10", "0,20,10,10,5", "0,20,10,10"] {
            assert!(q.clone().bounding_box(bbox).is_err(), "{bbox}");
        }
        assert!(q.bounding_box("-180,-90,180,90").is_ok());
    }

    #[test]
    fn temporal_ranges() {
        let q = CatalogQuery::new("C1");
        assert!(q.clone().temporal("2022-12-01T00:00:00Z,").is_ok());
        assert!(q.clone().temporal(",2022-12-01T00:00:00Z").is_ok());
        assert!(q.clone().temporal(",").is_err());
        assert!(q.clone().temporal("2022-12-01").is_err());
        assert!(q.clone().temporal("yesterday,today").is_err());
        assert!(
            q.temporal("2022-12-07T00:00:00Z,2022-12-01T00:00:00Z")
                .is_err()
        );
    }

    #[test]
    fn max_pages_is_at_least_one() {
        assert_eq!(CatalogQuery::new("C1").max_pages(0).max_pages, Some(1));
    }
}

//! Region registry: the fixed, closed set of region codes a refresh covers.
//!
//! A [`RegionRegistry`] is built once at startup and shared read-only for the
//! lifetime of the process. Every snapshot the refresher produces is keyed by
//! exactly the codes in the registry it was given.
//!
//! # Examples
//!
//! ```
//! use trendmap::regions::RegionRegistry;
//!
//! let registry = RegionRegistry::us_states();
//! assert_eq!(registry.len(), 50);
//! assert!(registry.parse("CA").is_some());
//! assert!(registry.parse("ca").is_none());
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while building a registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("region code must not be blank")]
    BlankCode,

    #[error("duplicate region code: {0}")]
    Duplicate(String),

    #[error("unknown region code: {0}")]
    Unknown(String),

    #[error("a registry needs at least one region")]
    Empty,
}

/// Opaque, case-sensitive identifier of one region.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionCode(String);

impl RegionCode {
    pub(crate) fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RegionCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where a map renderer should draw a region's label relative to its centroid,
/// as `(longitude, latitude)` deltas in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelOffset {
    pub longitude: f64,
    pub latitude: f64,
}

/// Static metadata for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    code: RegionCode,
    name: String,
    latitude: f64,
    longitude: f64,
    label_offset: Option<LabelOffset>,
}

impl Region {
    pub fn new(code: impl Into<String>, name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            code: RegionCode::new(code),
            name: name.into(),
            latitude,
            longitude,
            label_offset: None,
        }
    }

    #[must_use]
    pub fn with_label_offset(mut self, longitude: f64, latitude: f64) -> Self {
        self.label_offset = Some(LabelOffset {
            longitude,
            latitude,
        });
        self
    }

    pub fn code(&self) -> &RegionCode {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Centroid as `(latitude, longitude)`.
    pub fn centroid(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    pub fn label_offset(&self) -> Option<LabelOffset> {
        self.label_offset
    }
}

/// Immutable set of regions, ordered by code.
#[derive(Debug, Clone)]
pub struct RegionRegistry {
    regions: BTreeMap<RegionCode, Region>,
}

impl RegionRegistry {
    /// Builds a registry from explicit regions.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::Empty`]: no regions were supplied.
    /// - [`RegistryError::BlankCode`]: a code is empty or whitespace.
    /// - [`RegistryError::Duplicate`]: the same code appears twice.
    pub fn new(regions: impl IntoIterator<Item = Region>) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        for region in regions {
            if region.code.as_str().trim().is_empty() {
                return Err(RegistryError::BlankCode);
            }
            if map.contains_key(&region.code) {
                return Err(RegistryError::Duplicate(region.code.0));
            }
            map.insert(region.code.clone(), region);
        }
        if map.is_empty() {
            return Err(RegistryError::Empty);
        }
        Ok(Self { regions: map })
    }

    /// The 50 US states.
    pub fn us_states() -> Self {
        let regions = US_STATES
            .iter()
            .map(|&(code, name, lat, lon)| {
                let region = Region::new(code, name, lat, lon);
                match LABEL_OFFSETS.iter().find(|(c, _, _)| *c == code) {
                    Some(&(_, dlon, dlat)) => region.with_label_offset(dlon, dlat),
                    None => region,
                }
            })
            .map(|region| (region.code.clone(), region))
            .collect();
        Self { regions }
    }

    /// Builds a registry holding only `codes`, which must all be present here.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unknown`] for the first code not in this
    /// registry, or any error [`RegionRegistry::new`] would return.
    pub fn subset<I, T>(&self, codes: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut picked = Vec::new();
        for code in codes {
            let code = code.as_ref();
            let region = self
                .regions
                .get(&RegionCode::new(code))
                .ok_or_else(|| RegistryError::Unknown(code.to_owned()))?;
            picked.push(region.clone());
        }
        Self::new(picked)
    }

    /// Resolves `code` to a registered [`RegionCode`]. Matching is case-sensitive.
    pub fn parse(&self, code: &str) -> Option<&RegionCode> {
        self.regions
            .get_key_value(&RegionCode::new(code))
            .map(|(k, _)| k)
    }

    pub fn get(&self, code: &RegionCode) -> Option<&Region> {
        self.regions.get(code)
    }

    pub fn contains(&self, code: &RegionCode) -> bool {
        self.regions.contains_key(code)
    }

    pub fn codes(&self) -> impl Iterator<Item = &RegionCode> {
        self.regions.keys()
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

// (code, name, latitude, longitude)
const US_STATES: &[(&str, &str, f64, f64)] = &[
    ("AL", "Alabama", 32.806671, -86.791130),
    ("AK", "Alaska", 61.370716, -152.404419),
    ("AZ", "Arizona", 33.729759, -111.431221),
    ("AR", "Arkansas", 34.969704, -92.373123),
    ("CA", "California", 36.116203, -119.681564),
    ("CO", "Colorado", 39.059811, -105.311104),
    ("CT", "Connecticut", 41.597782, -72.755371),
    ("DE", "Delaware", 39.318523, -75.507141),
    ("FL", "Florida", 27.766279, -81.686783),
    ("GA", "Georgia", 33.040619, -83.643074),
    ("HI", "Hawaii", 21.094318, -157.498337),
    ("ID", "Idaho", 44.240459, -114.478828),
    ("IL", "Illinois", 40.349457, -88.986137),
    ("IN", "Indiana", 39.849426, -86.258278),
    ("IA", "Iowa", 42.011539, -93.210526),
    ("KS", "Kansas", 38.526600, -96.726486),
    ("KY", "Kentucky", 37.668140, -84.670067),
    ("LA", "Louisiana", 31.169546, -91.867805),
    ("ME", "Maine", 44.693947, -69.381927),
    ("MD", "Maryland", 39.063946, -76.802101),
    ("MA", "Massachusetts", 42.230171, -71.530106),
    ("MI", "Michigan", 43.326618, -84.536095),
    ("MN", "Minnesota", 45.694454, -93.900192),
    ("MS", "Mississippi", 32.741646, -89.678696),
    ("MO", "Missouri", 38.456085, -92.288368),
    ("MT", "Montana", 46.921925, -110.454353),
    ("NE", "Nebraska", 41.125370, -98.268082),
    ("NV", "Nevada", 38.313515, -117.055374),
    ("NH", "New Hampshire", 43.452492, -71.563896),
    ("NJ", "New Jersey", 40.298904, -74.521011),
    ("NM", "New Mexico", 34.840515, -106.248482),
    ("NY", "New York", 42.165726, -74.948051),
    ("NC", "North Carolina", 35.630066, -79.806419),
    ("ND", "North Dakota", 47.528912, -99.784012),
    ("OH", "Ohio", 40.388783, -82.764915),
    ("OK", "Oklahoma", 35.565342, -96.928917),
    ("OR", "Oregon", 44.572021, -122.070938),
    ("PA", "Pennsylvania", 40.590752, -77.209755),
    ("RI", "Rhode Island", 41.680893, -71.511780),
    ("SC", "South Carolina", 33.856892, -80.945007),
    ("SD", "South Dakota", 44.299782, -99.438828),
    ("TN", "Tennessee", 35.747845, -86.692345),
    ("TX", "Texas", 31.054487, -97.563461),
    ("UT", "Utah", 40.150032, -111.862434),
    ("VT", "Vermont", 44.045876, -72.710686),
    ("VA", "Virginia", 37.769337, -78.169968),
    ("WA", "Washington", 47.400902, -121.490494),
    ("WV", "West Virginia", 38.491226, -80.954456),
    ("WI", "Wisconsin", 44.268543, -89.616508),
    ("WY", "Wyoming", 42.755966, -107.302490),
];

// Small north-eastern states whose labels are drawn off to the side: (code, dlon, dlat).
const LABEL_OFFSETS: &[(&str, f64, f64)] = &[
    ("RI", 3.5, 0.0),
    ("CT", 3.2, -1.0),
    ("NJ", 3.5, -0.3),
    ("DE", 3.5, -1.0),
    ("MD", 3.2, -1.5),
    ("MA", 3.2, 0.5),
    ("VT", -3.2, 2.2),
    ("NH", -1.5, 2.8),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn us_states_has_fifty_unique_codes() {
        let registry = RegionRegistry::us_states();
        assert_eq!(registry.len(), 50);
        assert_eq!(US_STATES.len(), 50);
    }

    #[test]
    fn parse_is_case_sensitive() {
        let registry = RegionRegistry::us_states();
        assert_eq!(registry.parse("NY").map(RegionCode::as_str), Some("NY"));
        assert!(registry.parse("ny").is_none());
        assert!(registry.parse("DC").is_none());
    }

    #[test]
    fn label_offsets_attach_to_small_states() {
        let registry = RegionRegistry::us_states();
        let ri = registry.get(registry.parse("RI").unwrap()).unwrap();
        assert_eq!(
            ri.label_offset(),
            Some(LabelOffset {
                longitude: 3.5,
                latitude: 0.0
            })
        );
        let tx = registry.get(registry.parse("TX").unwrap()).unwrap();
        assert!(tx.label_offset().is_none());
        assert_eq!(tx.name(), "Texas");
    }

    #[test]
    fn subset_keeps_only_requested_codes() {
        let registry = RegionRegistry::us_states().subset(["CA", "NY", "TX"]).unwrap();
        let codes: Vec<_> = registry.codes().map(RegionCode::as_str).collect();
        assert_eq!(codes, vec!["CA", "NY", "TX"]);
    }

    #[test]
    fn subset_rejects_unknown_code() {
        let err = RegionRegistry::us_states().subset(["CA", "XX"]).unwrap_err();
        assert_eq!(err, RegistryError::Unknown("XX".into()));
    }

    #[test]
    fn new_rejects_duplicates_blank_and_empty() {
        let dup = RegionRegistry::new([
            Region::new("AA", "A", 0.0, 0.0),
            Region::new("AA", "A again", 1.0, 1.0),
        ]);
        assert_eq!(dup.unwrap_err(), RegistryError::Duplicate("AA".into()));

        let blank = RegionRegistry::new([Region::new("  ", "blank", 0.0, 0.0)]);
        assert_eq!(blank.unwrap_err(), RegistryError::BlankCode);

        let empty = RegionRegistry::new(Vec::<Region>::new());
        assert_eq!(empty.unwrap_err(), RegistryError::Empty);
    }
}

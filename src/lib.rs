//! Resolve genealogy place names to coordinates.
//!
//! Place strings are collected into a [`FuzzyAddressBook`], which folds
//! near-duplicates together. [`Geocode`] then resolves each place using a CSV
//! [`GeoCache`] where possible, and a rate-limited [`GeocodeProvider`]
//! otherwise.

pub use anyhow::{format_err, Error, Result};

pub mod address_book;
pub mod config;
pub mod countries;
pub mod errors;
pub mod geo_cache;
pub mod geocode;
pub mod geocoders;
pub mod location;

pub use crate::address_book::{FuzzyAddressBook, MergeStrategy};
pub use crate::config::{GeoConfig, GeocodeConfig, RetryPolicy};
pub use crate::errors::{GeocodeError, ProviderError};
pub use crate::geo_cache::GeoCache;
pub use crate::geocode::{Geocode, PlaceCountry};
pub use crate::geocoders::GeocodeProvider;
pub use crate::location::{LatLon, Location};

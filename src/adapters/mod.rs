//! Clients for the external systems: GeoServer, object storage and Zitadel.

pub mod bucket;
pub mod geoserver;
pub mod zitadel;

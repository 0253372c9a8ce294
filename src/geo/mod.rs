pub mod crs;
pub mod shapefile;
pub mod wkt;

//! Region-similarity analysis.
//!
//! Collapses the cleaned 4-D scan to one average time series per
//! segmentation label (`region_average`), then summarizes every pair of
//! regions with a symmetric similarity statistic (`similarity`).

pub mod region_average;
pub mod similarity;

pub use region_average::RegionAverageArray;
pub use similarity::{write_mapping_dict, RegionSimilarityMatrix};

pub mod attributes;
pub mod images;

pub use attributes::{validate_stratification_file, AttributeStats, VisualAttributeTable, IMAGE_ID_COLUMN};
pub use images::{decode, discover_pairs, ensure_dir, list_images, load_sample, save};

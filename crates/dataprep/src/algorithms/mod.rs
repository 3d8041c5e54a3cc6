pub mod augmentation;
pub mod binning;
pub mod geometry;
pub mod photometric;
pub mod sorting;
pub mod splitting;

pub use augmentation::{Augmenter, FlipLeftRight, FlipUpDown, Gate, RandomCrop, RandomRotate};
pub use binning::{doane_bin_width, doane_edges, BinSpec};
pub use geometry::{crop_to_box, grid_crop_boxes, CropResize, ResizeMethod};
pub use photometric::{Brightness, ColorJitter, Contrast, Saturation, UnitPixels};
pub use sorting::{natural_cmp, sort_names, sort_paths};
pub use splitting::{iterations, SplitPlan, Splitter};

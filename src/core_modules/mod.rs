pub mod background_model;
pub mod depth_frame;
pub mod foreground_extractor;
pub mod glyphs;
pub mod lens_model;
pub mod overlay;
pub mod polygon;
pub mod projector;
pub mod shape;

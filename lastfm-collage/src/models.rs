use image::RgbaImage;

/// A single square of the collage.
#[derive(Clone)]
pub struct Album {
    pub title: String,
    pub artist: String,
    pub cover_art: RgbaImage,
}

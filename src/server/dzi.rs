//! Deep Zoom Image (DZI) descriptor generation.
//!
//! Viewers such as OpenSeadragon bootstrap from an XML descriptor that names
//! the tile size, overlap, output format, and full-resolution dimensions;
//! every tile URL is then derived client-side. This module produces that
//! descriptor; the level mathematics live in the pyramid module.

/// Generate the DZI XML descriptor for a slide.
///
/// # Example Output
///
/// ```xml
/// <?xml version="1.0" encoding="UTF-8"?>
/// <Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
///        TileSize="254"
///        Overlap="1"
///        Format="jpeg">
///   <Size Width="46920" Height="33600" />
/// </Image>
/// ```
pub fn generate_dzi_xml(
    width: u32,
    height: u32,
    tile_size: u32,
    overlap: u32,
    format: &str,
) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
       TileSize="{tile_size}"
       Overlap="{overlap}"
       Format="{format}">
  <Size Width="{width}" Height="{height}" />
</Image>"#
    )
}

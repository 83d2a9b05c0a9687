use futures::future::LocalBoxFuture;

/// Explicit release of a texture's backing storage.
///
/// The streaming cache disposes every previously bound texture when a new
/// station's set replaces it; textures are never accumulated across
/// station switches.
pub trait Dispose {
    fn dispose(&mut self);
}

/// A decoded sensor image and its pixel buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
    size: (u32, u32),
    pixels: Option<Vec<u8>>,
}

impl Texture {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            size: (width, height),
            pixels: Some(pixels),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// The pixel buffer, or `None` once disposed.
    pub fn pixels(&self) -> Option<&[u8]> {
        self.pixels.as_deref()
    }

    pub fn is_disposed(&self) -> bool {
        self.pixels.is_none()
    }
}

impl Dispose for Texture {
    fn dispose(&mut self) {
        self.pixels = None;
    }
}

/// Builds per-sensor image URLs by placeholder substitution.
///
/// `{imageId}` expands to the station id and `{sensorId}` to the sensor id,
/// e.g. `images/{imageId}_{sensorId}.jpg`.
#[derive(Clone, Debug)]
pub struct UrlTemplate {
    template: String,
}

impl UrlTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn url(&self, station_id: &str, sensor_id: &str) -> String {
        self.template
            .replace("{imageId}", station_id)
            .replace("{sensorId}", sensor_id)
    }
}

/// The asynchronous image-fetch seam.
///
/// Futures are local (not `Send`): the whole streaming path runs on a
/// single cooperative thread. Errors carry a reason string; the streaming
/// cache attaches the station and sensor context.
pub trait ImageFetcher {
    type Texture: Dispose;

    fn fetch(&self, url: &str) -> LocalBoxFuture<'_, Result<Self::Texture, String>>;
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A sensor calibration record is malformed.
    ///
    /// Fatal at load time; the layer never initializes with a partial rig.
    #[error("InvalidCalibration: {0}")]
    InvalidCalibration(String),

    /// The layer's source reference system cannot be converted to geocentric.
    #[error("Reprojection: {0}")]
    Reprojection(String),

    /// A sensor image failed to load for a candidate station.
    ///
    /// Recoverable: the candidate never becomes ready and the previously
    /// bound imagery stays displayed.
    #[error("Fetch: station {station}, sensor {sensor}: {reason}")]
    Fetch {
        station: String,
        sensor: String,
        reason: String,
    },

    /// The layer holds no capture stations.
    #[error("NoStations: the station registry is empty")]
    NoStations,
}

use crate::error::Error;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// WGS84 semi-major axis in meters.
const WGS84_A: f64 = 6_378_137.0;

/// WGS84 first eccentricity squared.
const WGS84_E2: f64 = 6.694_379_990_141_316e-3;

/// The reference system of the raw station positions.
///
/// Raw records are reduced to geocentric Cartesian once at load time:
/// geocentric input is taken as-is, geographic input needs one conversion,
/// and any other projected system goes through geographic first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SourceCrs {
    /// Planetary-fixed Cartesian, e.g. EPSG:4978.
    Geocentric,
    /// Longitude/latitude in degrees plus ellipsoidal height, e.g. EPSG:4326.
    Geographic,
    /// A named projected system, resolved through a [`Reprojector`].
    Projected(String),
}

/// A longitude/latitude/altitude triple on the WGS84 ellipsoid.
///
/// Angles are in degrees, altitude in meters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geographic {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
}

/// Converts a geographic position to geocentric Cartesian coordinates.
pub fn geographic_to_geocentric(geo: &Geographic) -> Point3<f64> {
    let lon = geo.longitude.to_radians();
    let lat = geo.latitude.to_radians();

    // Prime vertical radius of curvature at this latitude.
    let n = WGS84_A / (1.0 - WGS84_E2 * lat.sin().powi(2)).sqrt();

    Point3::new(
        (n + geo.altitude) * lat.cos() * lon.cos(),
        (n + geo.altitude) * lat.cos() * lon.sin(),
        (n * (1.0 - WGS84_E2) + geo.altitude) * lat.sin(),
    )
}

/// Converts positions from a named projected system into geographic.
///
/// Supplied by the hosting application; the crate only knows the geocentric
/// and geographic cases natively.
pub trait Reprojector {
    fn to_geographic(
        &self,
        crs: &str,
        easting: f64,
        northing: f64,
        altitude: f64,
    ) -> Result<Geographic, Error>;
}

/// A [`Reprojector`] that supports no projected system at all.
///
/// Suitable when the layer declares a geocentric or geographic source.
pub struct NoReprojector;

impl Reprojector for NoReprojector {
    fn to_geographic(&self, crs: &str, _: f64, _: f64, _: f64) -> Result<Geographic, Error> {
        Err(Error::Reprojection(format!(
            "no reprojector configured for {crs}"
        )))
    }
}

/// Resolves one raw station position into geocentric coordinates.
pub fn resolve_position<R>(
    crs: &SourceCrs,
    reprojector: &R,
    easting: f64,
    northing: f64,
    altitude: f64,
) -> Result<Point3<f64>, Error>
where
    R: Reprojector + ?Sized,
{
    match crs {
        SourceCrs::Geocentric => Ok(Point3::new(easting, northing, altitude)),
        SourceCrs::Geographic => Ok(geographic_to_geocentric(&Geographic {
            longitude: easting,
            latitude: northing,
            altitude,
        })),
        SourceCrs::Projected(name) => {
            let geo = reprojector.to_geographic(name, easting, northing, altitude)?;
            Ok(geographic_to_geocentric(&geo))
        }
    }
}

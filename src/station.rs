use crate::error::Error;
use crate::geo::{Reprojector, SourceCrs, resolve_position};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// One raw capture-station record as found in an orientation document.
///
/// Position fields are in the layer's declared source reference system;
/// attitude angles are in degrees.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StationRecord {
    pub id: String,
    pub easting: f64,
    pub northing: f64,
    pub altitude: f64,
    pub roll: f64,
    pub pitch: f64,
    pub heading: f64,
}

/// Platform attitude at capture time, in degrees.
///
/// How the three angles combine into a rotation depends on the layer's
/// attitude convention.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attitude {
    pub roll: f64,
    pub pitch: f64,
    pub heading: f64,
}

/// A panoramic capture event: one point in space where the whole rig fired.
///
/// Position and attitude are immutable after load.
#[derive(Clone, Debug)]
pub struct CaptureStation {
    id: String,
    position: Point3<f64>,
    attitude: Attitude,
}

impl CaptureStation {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Geocentric Cartesian position, already offset and reprojected.
    pub fn position(&self) -> &Point3<f64> {
        &self.position
    }

    pub fn attitude(&self) -> &Attitude {
        &self.attitude
    }
}

/// All capture stations of a layer, in stable load order.
///
/// Indices handed out by [`StationRegistry::nearest`] are positions in this
/// order and stay valid for the lifetime of the layer.
pub struct StationRegistry {
    stations: Vec<CaptureStation>,
}

impl StationRegistry {
    /// Builds the registry from raw records.
    ///
    /// The fixed `offset` is added to each raw position before it is
    /// reprojected to geocentric per the layer's source reference system.
    pub fn from_records<R>(
        records: &[StationRecord],
        offset: &Vector3<f64>,
        crs: &SourceCrs,
        reprojector: &R,
    ) -> Result<Self, Error>
    where
        R: Reprojector + Sync,
    {
        let stations = records
            .par_iter()
            .map(|rec| {
                let position = resolve_position(
                    crs,
                    reprojector,
                    rec.easting + offset.x,
                    rec.northing + offset.y,
                    rec.altitude + offset.z,
                )?;

                Ok(CaptureStation {
                    id: rec.id.clone(),
                    position,
                    attitude: Attitude {
                        roll: rec.roll,
                        pitch: rec.pitch,
                        heading: rec.heading,
                    },
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self { stations })
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CaptureStation> {
        self.stations.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CaptureStation> {
        self.stations.iter()
    }

    /// Index of the station closest to `point`.
    ///
    /// Linear scan over all stations; ties resolve to the lowest index.
    /// Returns `None` when the registry is empty.
    pub fn nearest(&self, point: &Point3<f64>) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, station) in self.stations.iter().enumerate() {
            let dist2 = (station.position - point).norm_squared();
            if best.is_none_or(|(_, d)| dist2 < d) {
                best = Some((index, dist2));
            }
        }

        best.map(|(index, _)| index)
    }
}

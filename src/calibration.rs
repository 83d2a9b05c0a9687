use crate::error::Error;
use nalgebra::{Matrix3, Matrix4, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// Iterations granted to the fixed-point distortion inverse.
const UNDISTORT_MAX_STEPS: usize = 100;
const UNDISTORT_TOLERANCE: f64 = 1e-16;

/// One raw sensor calibration record from a rig calibration document.
///
/// `rotation` and `projection` are 9 floats row-major; `rotation` maps the
/// rig frame to the sensor frame. `position` is the sensor's optical center
/// within the rig, defaulting to the origin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SensorRecord {
    pub id: String,
    pub rotation: Vec<f64>,
    pub projection: Vec<f64>,
    pub size: Vec<f64>,
    #[serde(default)]
    pub position: Option<[f64; 3]>,
    #[serde(default)]
    pub distortion: Option<DistortionRecord>,
}

/// Raw lens distortion block of a [`SensorRecord`].
///
/// `poly357` holds the three odd radial coefficients, `limit` the maximum
/// corrected radius the polynomial was fitted for. `l1l2`/`etats` carry the
/// optional affine/skew correction of fisheye calibrations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DistortionRecord {
    pub pps: [f64; 2],
    pub poly357: [f64; 3],
    pub limit: f64,
    #[serde(default)]
    pub l1l2: Option<[f64; 2]>,
    #[serde(default)]
    pub etats: Option<f64>,
}

/// A sensor's lens distortion model in texture space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Distortion {
    pps: Vector2<f64>,
    poly357: Vector3<f64>,
    l1l2: Vector2<f64>,
    etats: f64,
    /// Validity radius squared, so the hot path compares without a sqrt.
    limit2: f64,
}

impl From<&DistortionRecord> for Distortion {
    fn from(rec: &DistortionRecord) -> Self {
        let l1l2 = rec
            .l1l2
            .map(|l| Vector2::new(l[0], l[1]))
            .unwrap_or_else(Vector2::zeros);

        Self {
            pps: Vector2::new(rec.pps[0], rec.pps[1]),
            poly357: Vector3::new(rec.poly357[0], rec.poly357[1], rec.poly357[2]),
            l1l2,
            etats: rec.etats.unwrap_or(0.0),
            limit2: rec.limit * rec.limit,
        }
    }
}

impl Distortion {
    /// Maps an ideal projected point to its distorted image location.
    ///
    /// Applies the plain radial polynomial, or the equisolid/affine formula
    /// when the `l1l2` correction is present. Returns `None` outside the
    /// validity radius.
    pub fn distort(&self, p: &Vector2<f64>) -> Option<Vector2<f64>> {
        if self.l1l2 == Vector2::zeros() {
            self.distort_radial(p)
        } else {
            self.distort_fisheye(p)
        }
    }

    fn distort_radial(&self, p: &Vector2<f64>) -> Option<Vector2<f64>> {
        let v = p - self.pps;
        let v2 = v.norm_squared();
        if v2 > self.limit2 {
            return None;
        }

        let c = self.poly357;
        Some(p + (v2 * (c.x + v2 * (c.y + v2 * c.z))) * v)
    }

    fn distort_fisheye(&self, p: &Vector2<f64>) -> Option<Vector2<f64>> {
        let ab_raw = (p - self.pps) / self.etats;
        let r = ab_raw.norm();
        // atan(R)/R -> 1 as R -> 0.
        let lambda = if r > 0.0 { r.atan() / r } else { 1.0 };
        let ab = lambda * ab_raw;
        let rho2 = ab.norm_squared();
        if rho2 > self.limit2 {
            return None;
        }

        let c = self.poly357;
        let r357 = (1.0 + rho2 * (c.x + rho2 * (c.y + rho2 * c.z))) * self.etats;
        let affine = Vector2::new(
            (self.l1l2.x * ab.x + self.l1l2.y * ab.y) * self.etats,
            self.l1l2.y * ab.x * self.etats,
        );

        Some(self.pps + r357 * ab + affine)
    }

    /// Maps a distorted image location back to the ideal projected point.
    ///
    /// Fixed-point inversion of [`Distortion::distort`]; returns `None` when
    /// the iteration leaves the validity radius or fails to settle.
    pub fn undistort(&self, p: &Vector2<f64>) -> Option<Vector2<f64>> {
        let mut q = *p;
        for _ in 0..UNDISTORT_MAX_STEPS {
            let forward = self.distort(&q)?;
            let residual = p - forward;
            if residual.norm_squared() < UNDISTORT_TOLERANCE {
                return Some(q);
            }
            q += residual;
        }

        None
    }

    /// Radial coefficients plus the squared validity radius, packed for the
    /// fragment program's `distortion` uniform.
    pub fn coefficients(&self) -> Vector4<f64> {
        Vector4::new(self.poly357.x, self.poly357.y, self.poly357.z, self.limit2)
    }

    /// Principal point offset, the `pps` uniform.
    pub fn pps(&self) -> &Vector2<f64> {
        &self.pps
    }

    /// Affine correction and its scale, packed for the `l1l2` uniform.
    pub fn l1l2_etats(&self) -> Vector3<f64> {
        Vector3::new(self.l1l2.x, self.l1l2.y, self.etats)
    }
}

/// One calibrated camera of the rig.
///
/// Calibration is rig-wide: the same sensor list serves every capture
/// station, and the sensor order fixes the array size baked into the
/// generated composite program.
#[derive(Clone, Debug)]
pub struct Sensor {
    id: String,
    station_to_texture: Matrix4<f64>,
    size: Vector2<f64>,
    distortion: Option<Distortion>,
}

impl Sensor {
    /// Builds a sensor from its raw record.
    ///
    /// `rig_correction` is the attitude convention's fixed rig-frame
    /// correction, folded into the rotation chain once here.
    pub fn from_record(rec: &SensorRecord, rig_correction: &Matrix3<f64>) -> Result<Self, Error> {
        if rec.rotation.len() != 9 {
            return Err(Error::InvalidCalibration(format!(
                "sensor {}: rotation has {} elements, expected 9",
                rec.id,
                rec.rotation.len()
            )));
        }
        if rec.projection.len() != 9 {
            return Err(Error::InvalidCalibration(format!(
                "sensor {}: projection has {} elements, expected 9",
                rec.id,
                rec.projection.len()
            )));
        }
        if rec.size.len() != 2 {
            return Err(Error::InvalidCalibration(format!(
                "sensor {}: size has {} elements, expected 2",
                rec.id,
                rec.size.len()
            )));
        }

        let rig_to_sensor = Matrix3::from_row_slice(&rec.rotation);
        let sensor_to_station = rig_correction * rig_to_sensor.transpose();
        let station_to_sensor = sensor_to_station.transpose();

        let projection = Matrix3::from_row_slice(&rec.projection);
        let station_to_texture = projection * station_to_sensor;

        let center = rec
            .position
            .map(|p| Vector3::new(p[0], p[1], p[2]))
            .unwrap_or_else(Vector3::zeros);
        let recenter = Matrix4::new_translation(&-center);

        Ok(Self {
            id: rec.id.clone(),
            station_to_texture: station_to_texture.to_homogeneous() * recenter,
            size: Vector2::new(rec.size[0], rec.size[1]),
            distortion: rec.distortion.as_ref().map(Distortion::from),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Station-local frame to homogeneous texture coordinates.
    ///
    /// Composition of the recentering translation, the station-to-sensor
    /// rotation, and the intrinsic projection. Fixed per rig.
    pub fn station_to_texture(&self) -> &Matrix4<f64> {
        &self.station_to_texture
    }

    /// Image size in pixels.
    pub fn size(&self) -> &Vector2<f64> {
        &self.size
    }

    pub fn distortion(&self) -> Option<&Distortion> {
        self.distortion.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector4 as V4;
    use quickcheck_macros::quickcheck;
    use rstest::rstest;

    const IDENTITY9: [f64; 9] = [1., 0., 0., 0., 1., 0., 0., 0., 1.];

    fn record(rotation: &[f64], projection: &[f64], size: &[f64]) -> SensorRecord {
        SensorRecord {
            id: "cam".into(),
            rotation: rotation.to_vec(),
            projection: projection.to_vec(),
            size: size.to_vec(),
            position: None,
            distortion: None,
        }
    }

    fn radial(poly357: [f64; 3], limit: f64) -> Distortion {
        Distortion::from(&DistortionRecord {
            pps: [0.0, 0.0],
            poly357,
            limit,
            l1l2: None,
            etats: None,
        })
    }

    fn fisheye(limit: f64) -> Distortion {
        Distortion::from(&DistortionRecord {
            pps: [1020.0, 1020.0],
            poly357: [1e-8, 0.0, 0.0],
            limit,
            l1l2: Some([1e-4, 2e-4]),
            etats: Some(1024.0),
        })
    }

    #[rstest]
    #[case(8, 9, 2)]
    #[case(9, 10, 2)]
    #[case(9, 9, 3)]
    fn malformed_records_are_rejected(
        #[case] rotation_len: usize,
        #[case] projection_len: usize,
        #[case] size_len: usize,
    ) {
        let rec = record(
            &vec![0.0; rotation_len],
            &vec![0.0; projection_len],
            &vec![0.0; size_len],
        );

        assert!(matches!(
            Sensor::from_record(&rec, &Matrix3::identity()),
            Err(Error::InvalidCalibration(_))
        ));
    }

    #[test]
    fn identity_calibration_projects_through_the_intrinsics() {
        // Focal length 1000, principal point (500, 500), row-major.
        let projection = [1000., 0., 500., 0., 1000., 500., 0., 0., 1.];
        let rec = record(&IDENTITY9, &projection, &[1000., 1000.]);
        let sensor = Sensor::from_record(&rec, &Matrix3::identity()).unwrap();

        let tex = sensor.station_to_texture() * V4::new(0.0, 0.0, 1.0, 1.0);
        assert_relative_eq!(tex.x / tex.z, 500.0);
        assert_relative_eq!(tex.y / tex.z, 500.0);
    }

    #[test]
    fn recentering_happens_before_rotation_and_projection() {
        let mut rec = record(&IDENTITY9, &IDENTITY9, &[100., 100.]);
        rec.position = Some([1.0, 2.0, 3.0]);
        let sensor = Sensor::from_record(&rec, &Matrix3::identity()).unwrap();

        let tex = sensor.station_to_texture() * V4::new(1.0, 2.0, 4.0, 1.0);
        assert_relative_eq!(tex.x, 0.0);
        assert_relative_eq!(tex.y, 0.0);
        assert_relative_eq!(tex.z, 1.0);
    }

    #[test]
    fn validity_radius_is_stored_squared() {
        let disto = radial([0.0; 3], 3.0);

        assert_relative_eq!(disto.coefficients().w, 9.0);
    }

    #[test]
    fn radial_rejects_beyond_the_validity_radius() {
        let disto = radial([1e-9, 0.0, 0.0], 10.0);

        assert!(disto.distort(&Vector2::new(9.0, 0.0)).is_some());
        assert!(disto.distort(&Vector2::new(11.0, 0.0)).is_none());
    }

    #[test]
    fn fisheye_rejects_beyond_the_normalized_radius() {
        // The normalized radius is atan(R), so rejection kicks in once
        // atan(|p - pps| / etats) exceeds the limit.
        let disto = fisheye(1.0);
        let inside = Vector2::new(1020.0 + 1024.0 * (0.9f64).tan(), 1020.0);
        let outside = Vector2::new(1020.0 + 1024.0 * (1.2f64).tan(), 1020.0);

        assert!(disto.distort(&inside).is_some());
        assert!(disto.distort(&outside).is_none());
    }

    #[test]
    fn fisheye_limit_beyond_half_pi_never_rejects() {
        // atan saturates below pi/2, so a limit of 5 accepts everything.
        let disto = fisheye(5.0);

        for x in [0.0, 500.0, 5000.0, 500_000.0] {
            assert!(disto.distort(&Vector2::new(x, 1020.0)).is_some());
        }
    }

    #[quickcheck]
    fn radial_roundtrip(x_seed: i16, y_seed: i16) -> bool {
        // Mild 3-coefficient model over a 2048 px frame.
        let disto = Distortion::from(&DistortionRecord {
            pps: [1024.0, 1024.0],
            poly357: [1e-9, -1e-16, 1e-23],
            limit: 1500.0,
            l1l2: None,
            etats: None,
        });

        let p = Vector2::new(
            1024.0 + x_seed as f64 * 1000.0 / i16::MAX as f64,
            1024.0 + y_seed as f64 * 1000.0 / i16::MAX as f64,
        );

        match disto.distort(&p).and_then(|d| disto.undistort(&d)) {
            Some(q) => (q - p).norm() < 1e-6,
            None => false,
        }
    }

    #[rstest]
    #[case(1020.0, 1020.0)]
    #[case(1400.0, 900.0)]
    #[case(300.0, 1700.0)]
    fn fisheye_roundtrip(#[case] x: f64, #[case] y: f64) {
        let disto = fisheye(1.4);
        let p = Vector2::new(x, y);

        let d = disto.distort(&p).expect("inside validity radius");
        let q = disto.undistort(&d).expect("inverse converges");
        assert_relative_eq!(q.x, p.x, epsilon = 1e-6);
        assert_relative_eq!(q.y, p.y, epsilon = 1e-6);
    }
}

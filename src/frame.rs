use crate::calibration::Sensor;
use crate::station::Attitude;
use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// How a station's roll/pitch/heading triple combines into a rotation.
///
/// Calibration datasets are locked to one convention or the other; the two
/// are not numerically equivalent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttitudeConvention {
    /// Euler angles combined in ZXY axis order, with a rig correction that
    /// swaps the X/Y axes.
    StereopolisV2,
    /// The classical Omega/Phi/Kappa aerial-photogrammetry matrix.
    MicMac,
}

impl AttitudeConvention {
    /// Rotation from the local tangent frame to the station frame.
    pub fn station_rotation(&self, attitude: &Attitude) -> Matrix3<f64> {
        match self {
            AttitudeConvention::StereopolisV2 => stereopolis_rotation(attitude),
            AttitudeConvention::MicMac => micmac_rotation(attitude),
        }
    }

    /// Fixed rig-frame correction, folded into each sensor's rotation chain
    /// at calibration-parse time.
    pub fn rig_correction(&self) -> Matrix3<f64> {
        match self {
            AttitudeConvention::StereopolisV2 => {
                Matrix3::new(0., -1., 0., 1., 0., 0., 0., 0., 1.)
            }
            AttitudeConvention::MicMac => Matrix3::identity(),
        }
    }
}

fn stereopolis_rotation(attitude: &Attitude) -> Matrix3<f64> {
    let heading = Rotation3::from_axis_angle(&Vector3::z_axis(), attitude.heading.to_radians());
    let pitch = Rotation3::from_axis_angle(&Vector3::x_axis(), attitude.pitch.to_radians());
    let roll = Rotation3::from_axis_angle(&Vector3::y_axis(), attitude.roll.to_radians());

    (heading * pitch * roll).into_inner()
}

fn micmac_rotation(attitude: &Attitude) -> Matrix3<f64> {
    // Omega about X, Phi about Y, Kappa about Z.
    let o = attitude.roll.to_radians();
    let p = attitude.pitch.to_radians();
    let k = attitude.heading.to_radians();

    let (so, co) = o.sin_cos();
    let (sp, cp) = p.sin_cos();
    let (sk, ck) = k.sin_cos();

    Matrix3::new(
        cp * ck,
        co * sk + so * sp * ck,
        so * sk - co * sp * ck,
        cp * sk,
        -co * ck + so * sp * sk,
        -so * ck - co * sp * sk,
        -sp,
        so * cp,
        -co * cp,
    )
}

/// Rotation taking the local tangent frame into the world frame.
///
/// A look-at frame whose +Z axis points along the planetary radial
/// direction at `position`, constructed against a fixed +Y reference up.
fn local_tangent_rotation(position: &Point3<f64>) -> Matrix3<f64> {
    let radial = position.coords.normalize();

    let mut reference_up = Vector3::y();
    if radial.cross(&reference_up).norm_squared() < f64::EPSILON {
        // Radial is parallel to the reference axis; pick another.
        reference_up = Vector3::z();
    }

    let x = reference_up.cross(&radial).normalize();
    let y = radial.cross(&x);

    Matrix3::from_columns(&[x, y, radial])
}

/// World (geocentric) to local tangent frame at a station position.
///
/// Translates the station to the origin and aligns local +Z with "up".
pub fn world_to_local_tangent(position: &Point3<f64>) -> Matrix4<f64> {
    let rotation = local_tangent_rotation(position);

    rotation.transpose().to_homogeneous() * Matrix4::new_translation(&-position.coords)
}

/// World to station ("pano") frame: the tangent frame composed with the
/// station's attitude under the layer's convention.
pub fn world_to_station(
    position: &Point3<f64>,
    attitude: &Attitude,
    convention: AttitudeConvention,
) -> Matrix4<f64> {
    convention.station_rotation(attitude).to_homogeneous() * world_to_local_tangent(position)
}

/// Recomputes every sensor's view-to-texture matrix for the current
/// viewpoint.
///
/// `out` must hold one slot per sensor; slots are written in place so the
/// per-frame path never reallocates.
pub fn update_sensor_matrices(
    out: &mut [Matrix4<f64>],
    sensors: &[Sensor],
    world_to_station: &Matrix4<f64>,
    camera_to_world: &Matrix4<f64>,
) {
    debug_assert_eq!(out.len(), sensors.len());

    let camera_to_station = world_to_station * camera_to_world;
    for (slot, sensor) in out.iter_mut().zip(sensors) {
        *slot = sensor.station_to_texture() * &camera_to_station;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_relative_eq, relative_eq};
    use nalgebra::Vector4;
    use quickcheck_macros::quickcheck;

    fn attitude(roll: f64, pitch: f64, heading: f64) -> Attitude {
        Attitude {
            roll,
            pitch,
            heading,
        }
    }

    #[quickcheck]
    fn station_rotations_are_orthonormal(r: i16, p: i16, h: i16) -> bool {
        let att = attitude(
            r as f64 * 180.0 / i16::MAX as f64,
            p as f64 * 180.0 / i16::MAX as f64,
            h as f64 * 180.0 / i16::MAX as f64,
        );

        [AttitudeConvention::StereopolisV2, AttitudeConvention::MicMac]
            .iter()
            .all(|conv| {
                let rot = conv.station_rotation(&att);
                relative_eq!(rot.transpose() * rot, Matrix3::identity(), epsilon = 1e-12)
            })
    }

    #[test]
    fn conventions_are_not_interchangeable() {
        let att = attitude(10.0, 20.0, 30.0);

        let a = AttitudeConvention::StereopolisV2.station_rotation(&att);
        let b = AttitudeConvention::MicMac.station_rotation(&att);
        assert!(!relative_eq!(a, b, epsilon = 1e-6));
    }

    #[test]
    fn stereopolis_heading_rotates_about_z() {
        let rot = AttitudeConvention::StereopolisV2.station_rotation(&attitude(0.0, 0.0, 90.0));

        assert_relative_eq!(
            rot * Vector3::x(),
            Vector3::y(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn micmac_zero_attitude_flips_y_and_z() {
        let rot = AttitudeConvention::MicMac.station_rotation(&attitude(0.0, 0.0, 0.0));

        assert_relative_eq!(
            rot,
            Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0)),
            epsilon = 1e-12
        );
    }

    #[test]
    fn tangent_frame_sends_the_station_to_the_origin() {
        let position = Point3::new(4_201_000.0, 177_860.0, 4_779_240.0);
        let m = world_to_local_tangent(&position);

        let local = m * Vector4::new(position.x, position.y, position.z, 1.0);
        assert_relative_eq!(local.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(local.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(local.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn tangent_frame_aligns_up_with_the_radial_direction() {
        let position = Point3::new(4_201_000.0, 177_860.0, 4_779_240.0);
        let m = world_to_local_tangent(&position);

        // A point straight above the station lands on the local +Z axis.
        let above = position.coords * 1.1;
        let local = m * Vector4::new(above.x, above.y, above.z, 1.0);
        assert_relative_eq!(local.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(local.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(local.z, position.coords.norm() * 0.1, epsilon = 1e-6);
    }

    #[test]
    fn tangent_frame_inverts_back_to_the_world_position() {
        let position = Point3::new(4_201_000.0, 177_860.0, 4_779_240.0);
        let m = world_to_local_tangent(&position);
        let inv = m.try_inverse().expect("rigid transform is invertible");

        let back = inv * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(back.x, position.x, epsilon = 1e-6);
        assert_relative_eq!(back.y, position.y, epsilon = 1e-6);
        assert_relative_eq!(back.z, position.z, epsilon = 1e-6);
    }

    #[test]
    fn polar_station_falls_back_to_the_alternate_reference_axis() {
        let position = Point3::new(0.0, 6_356_752.0, 0.0);
        let m = world_to_local_tangent(&position);

        // Still a rigid transform: the station maps to the origin and the
        // rotation part stays orthonormal.
        let local = m * Vector4::new(position.x, position.y, position.z, 1.0);
        assert_relative_eq!(local.norm(), 0.0, epsilon = 1e-6);

        let rot = m.fixed_view::<3, 3>(0, 0).into_owned();
        assert_relative_eq!(rot.transpose() * rot, Matrix3::identity(), epsilon = 1e-12);
    }
}

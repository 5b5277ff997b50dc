//! Pose convention bridge between the compositor and the mapping engine.
//!
//! The compositor reports head poses in a right-handed, Y-up frame with the
//! camera looking down -Z. The mapping engine works in the vision convention:
//! Y-down, looking down +Z. Everything here is pure and deterministic.

use nalgebra::{Isometry3, Matrix4, Quaternion, Translation3, UnitQuaternion, Vector3};

/// A device pose as located by the compositor: position plus unit orientation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DevicePose {
    pub position: Vector3<f32>,
    pub orientation: UnitQuaternion<f32>,
}

impl DevicePose {
    pub fn identity() -> Self {
        Self {
            position: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
        }
    }

    /// Build from raw components. The quaternion is given as (x, y, z, w) and
    /// is renormalised, since runtimes only guarantee approximately unit values.
    pub fn from_components(position: [f32; 3], orientation_xyzw: [f32; 4]) -> Self {
        let [x, y, z, w] = orientation_xyzw;
        Self {
            position: Vector3::new(position[0], position[1], position[2]),
            orientation: UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)),
        }
    }
}

impl Default for DevicePose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Homogeneous head-to-world transform of a device pose.
pub fn head_to_world(pose: &DevicePose) -> Isometry3<f32> {
    Isometry3::from_parts(Translation3::from(pose.position), pose.orientation)
}

/// The fixed axis correction diag(1, -1, -1): flips Y and Z.
///
/// This is a proper rotation (half turn about X), so it is its own inverse.
pub fn axis_flip() -> Isometry3<f32> {
    Isometry3::from_parts(
        Translation3::identity(),
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f32::consts::PI),
    )
}

/// Device pose expressed as a view transform in the engine's axis convention.
///
/// Inverts the head-to-world transform, then applies the axis flip on the left.
pub fn device_to_engine(pose: &DevicePose) -> Isometry3<f32> {
    axis_flip() * head_to_world(pose).inverse()
}

/// Pose handed to the renderer for one view.
///
/// `T_render = T_headToEngine * T_cameraToWorld^-1`, where `camera_to_world`
/// is the engine's current tracking estimate.
pub fn render_pose(pose: &DevicePose, camera_to_world: &Isometry3<f32>) -> Isometry3<f32> {
    device_to_engine(pose) * camera_to_world.inverse()
}

/// Matrix form, for collaborators that take a plain 4x4.
pub fn to_matrix(transform: &Isometry3<f32>) -> Matrix4<f32> {
    transform.to_homogeneous()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn assert_matrix_eq(a: &Matrix4<f32>, b: &Matrix4<f32>) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < EPS, "{a} != {b}");
        }
    }

    #[test]
    fn axis_flip_is_diagonal() {
        let expected = Matrix4::from_diagonal(&nalgebra::Vector4::new(1.0, -1.0, -1.0, 1.0));
        assert_matrix_eq(&to_matrix(&axis_flip()), &expected);
    }

    #[test]
    fn axis_flip_twice_is_identity() {
        let twice = axis_flip() * axis_flip();
        assert_matrix_eq(&to_matrix(&twice), &Matrix4::identity());
    }

    #[test]
    fn identity_device_pose_yields_axis_flip() {
        let reference = device_to_engine(&DevicePose::identity());
        assert_matrix_eq(&to_matrix(&reference), &to_matrix(&axis_flip()));

        let render = render_pose(&DevicePose::identity(), &Isometry3::identity());
        assert_matrix_eq(&to_matrix(&render), &to_matrix(&axis_flip()));
    }

    #[test]
    fn translated_head_moves_world_opposite_in_engine_axes() {
        // Head 1m up (compositor +Y). In the view frame the world sits 1m below,
        // and after the flip "below" is engine +Y.
        let pose = DevicePose::from_components([0.0, 1.0, 0.0], [0.0, 0.0, 0.0, 1.0]);
        let view = device_to_engine(&pose);
        let t = view.translation.vector;
        assert!((t.x).abs() < EPS);
        assert!((t.y - 1.0).abs() < EPS);
        assert!((t.z).abs() < EPS);
    }

    #[test]
    fn render_pose_composes_engine_estimate() {
        let pose = DevicePose::from_components([0.1, 0.2, -0.3], [0.0, 0.3826834, 0.0, 0.9238795]);
        let camera_to_world = Isometry3::from_parts(
            Translation3::new(0.5, 0.0, 2.0),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.25),
        );
        let render = render_pose(&pose, &camera_to_world);
        let expected = device_to_engine(&pose) * camera_to_world.inverse();
        assert_matrix_eq(&to_matrix(&render), &to_matrix(&expected));

        // Undoing the engine estimate recovers the device-only transform.
        let recovered = render * camera_to_world;
        assert_matrix_eq(&to_matrix(&recovered), &to_matrix(&device_to_engine(&pose)));
    }

    #[test]
    fn components_are_renormalised() {
        let pose = DevicePose::from_components([0.0; 3], [0.0, 0.0, 0.0, 2.0]);
        assert!((pose.orientation.norm() - 1.0).abs() < EPS);
        assert_eq!(pose, DevicePose::identity());
    }
}

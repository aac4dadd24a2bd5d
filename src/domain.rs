//! Simulation box geometry.
//!
//! A [`Domain`] describes the global box, its periodicity and, for sheared
//! boxes, the tilt factors that map fractional (lamda) coordinates to
//! cartesian ones:
//!
//! ```text
//! x = H * lamda + boxlo,   H = | xprd  xy   xz  |
//!                              |  0   yprd  yz  |
//!                              |  0    0   zprd |
//! ```
//!
//! The domain also records the sub-box owned by this process. For orthogonal
//! boxes the sub-box is in cartesian coordinates; for triclinic boxes it is
//! in lamda coordinates, so that processes on both sides of a periodic or
//! processor boundary agree on where that boundary is.

use nalgebra::{Matrix3, Point3, Vector3};

use crate::error::BinError;

#[cfg(test)]
mod tests {
    use super::*;

    fn tilted() -> Domain {
        Domain::triclinic(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(10.0, 8.0, 6.0),
            [2.0, -1.0, 1.5],
            [true; 3],
        )
        .unwrap()
    }

    #[test]
    fn lamda_round_trip() {
        let domain = tilted();
        let x = Point3::new(3.3, 4.1, 2.7);
        let lamda = domain.x2lamda(&x);
        let back = domain.lamda2x(&lamda);
        assert!((back - x).norm() < 1e-12);
    }

    #[test]
    fn lamda_corners_map_to_box() {
        let domain = tilted();
        let x = domain.lamda2x(&Point3::new(1.0, 1.0, 1.0));
        // boxhi shifted by every tilt factor
        assert!((x - Point3::new(11.0, 9.5, 6.0)).norm() < 1e-12);
    }

    #[test]
    fn triclinic_bounding_box_contains_tilt() {
        let domain = tilted();
        let (lo, hi) = domain.bounding_box();
        assert!((lo.x - -1.0).abs() < 1e-12);
        assert!((hi.x - 12.0).abs() < 1e-12);
        assert!((lo.y - 0.0).abs() < 1e-12);
        assert!((hi.y - 9.5).abs() < 1e-12);
        assert_eq!(lo.z, 0.0);
        assert_eq!(hi.z, 6.0);
    }

    #[test]
    fn orthogonal_ghost_cutoff_is_isotropic() {
        let domain = Domain::orthogonal(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(5.0, 5.0, 5.0),
            [true; 3],
        )
        .unwrap();
        assert_eq!(domain.ghost_cutoff(2.5), Vector3::new(2.5, 2.5, 2.5));
    }

    #[test]
    fn reject_inverted_box() {
        let result = Domain::orthogonal(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(5.0, -1.0, 5.0),
            [true; 3],
        );
        assert!(matches!(result, Err(BinError::Configuration { .. })));
    }

    #[test]
    fn reject_non_finite_box() {
        let result = Domain::orthogonal(
            Point3::new(0.0, f64::NAN, 0.0),
            Point3::new(5.0, 5.0, 5.0),
            [true; 3],
        );
        assert!(matches!(result, Err(BinError::NonFiniteGeometry { .. })));
    }

    #[test]
    fn wrap_into_primary_image() {
        let domain = Domain::orthogonal(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(5.0, 5.0, 5.0),
            [true, true, false],
        )
        .unwrap();
        let x = domain.wrap(&Point3::new(-1.0, 6.0, 7.0));
        assert!((x - Point3::new(4.0, 1.0, 5.0)).norm() < 1e-12);
        assert!((domain.lamda_cutoff(2.5) - Vector3::new(0.5, 0.5, 0.5)).norm() < 1e-12);
    }

    #[test]
    fn periodic_image_shifts_by_box_vectors() {
        let domain = tilted();
        let x = Point3::new(1.0, 1.0, 1.0);
        let image = domain.image(&x, [0, 1, 0]);
        assert!((image - Point3::new(3.0, 9.0, 1.0)).norm() < 1e-12);
    }
}

/// Global box, periodicity and the sub-box owned by this process.
#[derive(Debug, Clone, PartialEq)]
pub struct Domain {
    pub boxlo: Point3<f64>,
    pub boxhi: Point3<f64>,
    pub periodic: [bool; 3],
    triclinic: bool,
    h: Matrix3<f64>,
    h_inv: Matrix3<f64>,
    sublo: Point3<f64>,
    subhi: Point3<f64>,
}

impl Domain {
    /// Creates an orthogonal box. The sub-box defaults to the whole box.
    pub fn orthogonal(
        boxlo: Point3<f64>,
        boxhi: Point3<f64>,
        periodic: [bool; 3],
    ) -> Result<Self, BinError> {
        Self::build(boxlo, boxhi, [0.0; 3], periodic, false)
    }

    /// Creates a sheared box with tilt factors `[xy, xz, yz]`. The sub-box
    /// defaults to the whole box, `[0, 1]` in every lamda coordinate.
    pub fn triclinic(
        boxlo: Point3<f64>,
        boxhi: Point3<f64>,
        tilt: [f64; 3],
        periodic: [bool; 3],
    ) -> Result<Self, BinError> {
        Self::build(boxlo, boxhi, tilt, periodic, true)
    }

    fn build(
        boxlo: Point3<f64>,
        boxhi: Point3<f64>,
        tilt: [f64; 3],
        periodic: [bool; 3],
        triclinic: bool,
    ) -> Result<Self, BinError> {
        let finite = boxlo.iter().chain(boxhi.iter()).chain(tilt.iter()).all(|v| v.is_finite());
        if !finite {
            return Err(BinError::NonFiniteGeometry { id: None });
        }
        if (0..3).any(|d| boxhi[d] <= boxlo[d]) {
            return Err(BinError::configuration(
                "box upper corner must exceed the lower corner on every axis",
            ));
        }

        let prd = boxhi - boxlo;
        let [xy, xz, yz] = tilt;
        #[rustfmt::skip]
        let h = Matrix3::new(
            prd.x, xy,    xz,
            0.0,   prd.y, yz,
            0.0,   0.0,   prd.z,
        );
        // upper triangular with a positive diagonal, always invertible
        #[rustfmt::skip]
        let h_inv = Matrix3::new(
            1.0 / prd.x, -xy / (prd.x * prd.y), (xy * yz - prd.y * xz) / (prd.x * prd.y * prd.z),
            0.0,         1.0 / prd.y,           -yz / (prd.y * prd.z),
            0.0,         0.0,                   1.0 / prd.z,
        );

        let (sublo, subhi) = if triclinic {
            (Point3::origin(), Point3::new(1.0, 1.0, 1.0))
        } else {
            (boxlo, boxhi)
        };

        Ok(Self {
            boxlo,
            boxhi,
            periodic,
            triclinic,
            h,
            h_inv,
            sublo,
            subhi,
        })
    }

    /// Restricts the owned region to a sub-box: cartesian for orthogonal
    /// boxes, lamda for triclinic ones.
    pub fn with_subdomain(mut self, sublo: Point3<f64>, subhi: Point3<f64>) -> Result<Self, BinError> {
        if sublo.iter().chain(subhi.iter()).any(|v| !v.is_finite()) {
            return Err(BinError::NonFiniteGeometry { id: None });
        }
        if (0..3).any(|d| subhi[d] < sublo[d]) {
            return Err(BinError::configuration("sub-box corners are inverted"));
        }
        self.sublo = sublo;
        self.subhi = subhi;
        Ok(self)
    }

    pub fn is_triclinic(&self) -> bool {
        self.triclinic
    }

    pub fn sublo(&self) -> Point3<f64> {
        self.sublo
    }

    pub fn subhi(&self) -> Point3<f64> {
        self.subhi
    }

    /// Edge lengths of the untilted box.
    pub fn extent(&self) -> Vector3<f64> {
        self.boxhi - self.boxlo
    }

    /// Converts a cartesian position to lamda coordinates.
    pub fn x2lamda(&self, x: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.h_inv * (x - self.boxlo))
    }

    /// Converts lamda coordinates to a cartesian position.
    pub fn lamda2x(&self, lamda: &Point3<f64>) -> Point3<f64> {
        self.boxlo + self.h * lamda.coords
    }

    /// Cartesian bounding box of the whole (possibly tilted) box.
    pub fn bounding_box(&self) -> (Point3<f64>, Point3<f64>) {
        if self.triclinic {
            self.lamda_bbox(&Point3::origin(), &Point3::new(1.0, 1.0, 1.0))
        } else {
            (self.boxlo, self.boxhi)
        }
    }

    /// Cartesian bounding box of the lamda box `[lo, hi]`, found from its
    /// eight corners.
    pub fn lamda_bbox(&self, lo: &Point3<f64>, hi: &Point3<f64>) -> (Point3<f64>, Point3<f64>) {
        let mut bboxlo = Point3::new(f64::MAX, f64::MAX, f64::MAX);
        let mut bboxhi = Point3::new(f64::MIN, f64::MIN, f64::MIN);
        for corner in 0..8 {
            let lamda = Point3::new(
                if corner & 1 == 0 { lo.x } else { hi.x },
                if corner & 2 == 0 { lo.y } else { hi.y },
                if corner & 4 == 0 { lo.z } else { hi.z },
            );
            let x = self.lamda2x(&lamda);
            for d in 0..3 {
                bboxlo[d] = bboxlo[d].min(x[d]);
                bboxhi[d] = bboxhi[d].max(x[d]);
            }
        }
        (bboxlo, bboxhi)
    }

    /// Ghost communication distance per axis for a cutoff `cut`. Cartesian
    /// for orthogonal boxes. For triclinic boxes it is the lamda distance
    /// that covers `cut` along each axis (the row norms of `H^-1`).
    pub fn ghost_cutoff(&self, cut: f64) -> Vector3<f64> {
        if self.triclinic {
            self.lamda_cutoff(cut)
        } else {
            Vector3::repeat(cut)
        }
    }

    /// Lamda distance along each axis that covers a cartesian distance `cut`.
    pub fn lamda_cutoff(&self, cut: f64) -> Vector3<f64> {
        Vector3::from_fn(|d, _| cut * self.h_inv.row(d).norm())
    }

    /// Maps `x` into the primary image along periodic axes and clamps it
    /// into the box along the others.
    pub fn wrap(&self, x: &Point3<f64>) -> Point3<f64> {
        let mut lamda = self.x2lamda(x);
        for d in 0..3 {
            lamda[d] = if self.periodic[d] {
                lamda[d].rem_euclid(1.0)
            } else {
                lamda[d].clamp(0.0, 1.0)
            };
        }
        self.lamda2x(&lamda)
    }

    /// Periodic image of `x` shifted by whole box vectors.
    pub fn image(&self, x: &Point3<f64>, shift: [i32; 3]) -> Point3<f64> {
        let shift = Vector3::new(shift[0] as f64, shift[1] as f64, shift[2] as f64);
        x + self.h * shift
    }
}

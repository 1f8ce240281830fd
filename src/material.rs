//! Surface Materials
//!
//! Friction and restitution coefficients embedded per object. When two
//! objects touch, the solver combines their coefficients by averaging.

/// Surface response coefficients of one object.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    /// Static friction coefficient (bounds positional friction corrections)
    pub static_friction: f32,
    /// Dynamic friction coefficient (bounds velocity-level friction impulses)
    pub dynamic_friction: f32,
    /// Restitution coefficient (0 = perfectly inelastic, 1 = elastic)
    pub restitution: f32,
}

impl Material {
    /// Create a material from its three coefficients.
    #[inline]
    pub const fn new(static_friction: f32, dynamic_friction: f32, restitution: f32) -> Self {
        Self {
            static_friction,
            dynamic_friction,
            restitution,
        }
    }

    /// Frictionless, perfectly inelastic surface.
    pub const FRICTIONLESS: Self = Self::new(0.0, 0.0, 0.0);

    /// Pairwise combination: the average of each coefficient.
    #[inline]
    pub fn combine(a: &Material, b: &Material) -> Material {
        Material {
            static_friction: 0.5 * (a.static_friction + b.static_friction),
            dynamic_friction: 0.5 * (a.dynamic_friction + b.dynamic_friction),
            restitution: 0.5 * (a.restitution + b.restitution),
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::new(0.6, 0.4, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_averages() {
        let a = Material::new(1.0, 0.8, 0.2);
        let b = Material::new(0.0, 0.4, 0.6);
        let c = Material::combine(&a, &b);
        assert!((c.static_friction - 0.5).abs() < 1e-6);
        assert!((c.dynamic_friction - 0.6).abs() < 1e-6);
        assert!((c.restitution - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_combine_is_symmetric() {
        let a = Material::new(0.3, 0.2, 0.9);
        let b = Material::default();
        assert_eq!(Material::combine(&a, &b), Material::combine(&b, &a));
    }
}

//! C1 — the algebraic structure every reducer is polymorphic over.
//!
//! A structure carries an additive identity, a commutative associative sum,
//! an optional product (semirings only), and a handle the collective layer
//! can use to reduce a contiguous vector across processes. Implementers that
//! need a non-standard reduction (e.g. a tie-broken min) register it with
//! the communicator at construction time; registration failure is fatal and
//! leaves no partial state (`AlgebraicStructure::new` style constructors
//! should not be retried after a registration error).

use crate::communicator::Communicator;
use crate::error::Result;
use std::fmt::Debug;

/// Carries `(0, +, *)` or `(0, +)` plus a collective reduction handle.
///
/// `mul` is only meaningful for semirings; monoid-only structures should
/// panic or return an obviously-wrong value if `mul` is called — the
/// planner never invokes `mul` on a structure that declares itself a
/// monoid via [`AlgebraicStructure::is_semiring`].
pub trait AlgebraicStructure: Clone + Send + Sync {
    /// The element type tensors of this structure store. `Serialize`/
    /// `DeserializeOwned` are required because every collective crosses the
    /// [`Communicator`] seam as bytes (see `communicator::all_reduce_with`).
    type Elem: Copy
        + Debug
        + Send
        + Sync
        + PartialEq
        + serde::Serialize
        + serde::de::DeserializeOwned;

    /// Additive identity `0_T`.
    fn identity(&self) -> Self::Elem;

    /// Binary sum `⊕`, associative and commutative.
    fn add(&self, a: Self::Elem, b: Self::Elem) -> Self::Elem;

    /// Binary product `⊗`, also doubling as the scalar action used to apply
    /// `alpha`/`beta` coefficients. Only invoked as a *tensor* contraction
    /// operator when `is_semiring()` is true; monoid-only structures must
    /// still define it (at minimum for scaling by [`AlgebraicStructure::one`])
    /// since every reducer applies `beta` through `mul`.
    fn mul(&self, a: Self::Elem, b: Self::Elem) -> Self::Elem;

    /// Multiplicative identity, used as the "don't rescale, just accumulate"
    /// sentinel the virtualization reducer passes as `beta` on every visit
    /// to a C-block after the first (§4.4).
    fn one(&self) -> Self::Elem;

    /// Whether this structure supplies a product (semiring) or not (monoid).
    /// A monoid structure still implements `mul` (see above) but the
    /// planner refuses to build `contract()` plans for it — only
    /// `sum`/`scale` are offered.
    fn is_semiring(&self) -> bool {
        true
    }

    /// Whether `add` is only associative up to a canonical tie-break
    /// (e.g. the path semiring's hop-count/multiplicity tie-break), which
    /// forces the virtualization reducer to visit blocks in a fixed order
    /// for bit-identical results across runs.
    fn is_ordered(&self) -> bool {
        false
    }

    /// Reduce `buffer` elementwise with `⊕` across every rank in `comm`,
    /// in place. `count` is the number of `Elem`s in `buffer`.
    fn reduce(
        &self,
        comm: &dyn Communicator,
        buffer: &mut [Self::Elem],
        count: usize,
    ) -> Result<()>;

    /// Register this structure's reduction with the communicator. Called
    /// once, at attachment to a tensor; failure is fatal (see module docs).
    fn register(&self, _comm: &dyn Communicator) -> Result<()> {
        Ok(())
    }

    /// Scale `x` by `1/n`. Only called by the symmetry iterator when
    /// redundant-computation normalization is needed (§4.3) — structures
    /// without a literal division action (e.g. a tropical path semiring)
    /// are never asked to preserve a symmetry group that needs this, so the
    /// default is an error rather than a panic.
    fn scale_reciprocal(&self, _x: Self::Elem, _n: u32) -> Result<Self::Elem> {
        Err(crate::error::CtfError::InvalidInput(
            "this algebraic structure does not support symmetrization normalization".to_string(),
        ))
    }

    /// Additive inverse, needed only to write the `-1` sign terms the
    /// symmetry iterator emits for AS/SH groups (§4.3). Structures without a
    /// meaningful negation (the path semiring has none) never carry such a
    /// group, so the default is an error rather than a panic.
    fn negate(&self, _x: Self::Elem) -> Result<Self::Elem> {
        Err(crate::error::CtfError::InvalidInput(
            "this algebraic structure has no additive inverse".to_string(),
        ))
    }
}

/// The ordinary `(0, +, *)` ring over a numeric type.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Ring<T> {
    _marker: std::marker::PhantomData<T>,
}

impl<T> Ring<T> {
    pub fn new() -> Self {
        Ring {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> AlgebraicStructure for Ring<T>
where
    T: num_traits::Num
        + std::ops::Neg<Output = T>
        + Copy
        + Debug
        + Send
        + Sync
        + PartialEq
        + serde::Serialize
        + serde::de::DeserializeOwned,
{
    type Elem = T;

    fn identity(&self) -> T {
        T::zero()
    }

    fn add(&self, a: T, b: T) -> T {
        a + b
    }

    fn mul(&self, a: T, b: T) -> T {
        a * b
    }

    fn one(&self) -> T {
        T::one()
    }

    fn reduce(&self, comm: &dyn Communicator, buffer: &mut [T], count: usize) -> Result<()> {
        crate::communicator::all_reduce_with(comm, buffer, count, |a, b| a + b)
    }

    fn scale_reciprocal(&self, x: T, n: u32) -> Result<T> {
        if n == 0 {
            return Err(crate::error::CtfError::InvalidInput(
                "cannot scale by 1/0".to_string(),
            ));
        }
        let mut denom = T::zero();
        for _ in 0..n {
            denom = denom + T::one();
        }
        Ok(x / denom)
    }

    fn negate(&self, x: T) -> Result<T> {
        Ok(-x)
    }
}

/// The tropical-with-tiebreak path semiring used by APSP/betweenness
/// scenarios: `add` keeps the shorter distance, summing multiplicities on a
/// tie; `mul` composes path lengths and multiplies multiplicities. `0_T` is
/// "no path" (distance = u32::MAX, multiplicity = 0).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TropicalTiebreak;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PathWeight {
    pub distance: u32,
    pub multiplicity: u32,
}

impl PathWeight {
    pub const NO_PATH: PathWeight = PathWeight {
        distance: u32::MAX,
        multiplicity: 0,
    };

    pub fn edge(distance: u32) -> PathWeight {
        PathWeight {
            distance,
            multiplicity: 1,
        }
    }
}

impl AlgebraicStructure for TropicalTiebreak {
    type Elem = PathWeight;

    fn identity(&self) -> PathWeight {
        PathWeight::NO_PATH
    }

    fn add(&self, a: PathWeight, b: PathWeight) -> PathWeight {
        use std::cmp::Ordering::*;
        match a.distance.cmp(&b.distance) {
            Less => a,
            Greater => b,
            Equal => PathWeight {
                distance: a.distance,
                multiplicity: a.multiplicity + b.multiplicity,
            },
        }
    }

    fn mul(&self, a: PathWeight, b: PathWeight) -> PathWeight {
        if a.distance == u32::MAX || b.distance == u32::MAX {
            return PathWeight::NO_PATH;
        }
        PathWeight {
            distance: a.distance + b.distance,
            multiplicity: a.multiplicity * b.multiplicity,
        }
    }

    fn one(&self) -> PathWeight {
        PathWeight {
            distance: 0,
            multiplicity: 1,
        }
    }

    fn is_ordered(&self) -> bool {
        true
    }

    fn reduce(
        &self,
        comm: &dyn Communicator,
        buffer: &mut [PathWeight],
        count: usize,
    ) -> Result<()> {
        let alg = *self;
        crate::communicator::all_reduce_with(comm, buffer, count, move |a, b| alg.add(a, b))
    }
}

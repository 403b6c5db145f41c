// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Vocabulary traits for observe / diff / apply reconciliation of external
//! resources.
//!
//! A reconciler never trusts its own bookkeeping: it observes the external
//! system, compares the observation with a requirement, and issues the
//! minimal operations that move the system toward the requirement. These
//! traits name the pieces of that loop so that one manager type can carry
//! several reconciliation concerns, one per marker type.

use std::future::Future;

/// Collect the state of an external system.
///
/// The associated `Observation` is a [GAT] parameterized over `'a where
/// Self: 'a`, so implementations are free to return borrowed views, owned
/// snapshots, or `Result`s thereof.
///
/// # Contract
///
/// Observing must not mutate the observed system.
///
/// [GAT]: https://rust-lang.github.io/generic-associated-types-initiative/explainer/motivation.html
pub trait Observe {
    /// The returned data type of the observation.
    type Observation<'a>
    where
        Self: 'a;

    /// Observe the state of the system.
    fn observe<'a>(&self) -> impl Future<Output = Self::Observation<'a>>
    where
        Self: 'a;
}

/// Create an external resource described by a requirement.
pub trait Create {
    /// The data needed to create the resource.
    type Requirement<'a>
    where
        Self: 'a;

    /// Any data returned by the create operation, usually a `Result`.
    type Outcome<'a>
    where
        Self: 'a;

    /// Create a resource in service of a requirement.
    fn create<'a>(
        &self,
        requirement: Self::Requirement<'a>,
    ) -> impl Future<Output = Self::Outcome<'a>> + Send
    where
        Self: 'a;
}

/// Mutate an extant resource toward the state a requirement describes.
pub trait Update {
    /// The data needed to describe the required state.
    type Requirement<'a>
    where
        Self: 'a;

    /// The observed state of the resource being updated.
    type Observation<'a>
    where
        Self: 'a;

    /// Any data returned by the update operation, usually a `Result`.
    type Outcome<'a>
    where
        Self: 'a;

    /// Move the observed resource closer to the requirement.
    ///
    /// # Contract
    ///
    /// One call is not required to fully converge the resource; it only
    /// must not move the resource further from the requirement. Callers
    /// re-observe and call again until converged.
    fn update<'a>(
        &self,
        requirement: Self::Requirement<'a>,
        observation: Self::Observation<'a>,
    ) -> impl Future<Output = Self::Outcome<'a>> + Send
    where
        Self: 'a;
}

/// Remove an observed external resource.
pub trait Remove {
    /// The observed state of the resource being removed.
    type Observation<'a>
    where
        Self: 'a;

    /// Any data returned by the remove operation, usually a `Result`.
    type Outcome<'a>
    where
        Self: 'a;

    /// Remove an observed external resource.
    fn remove<'a>(
        &self,
        observation: Self::Observation<'a>,
    ) -> impl Future<Output = Self::Outcome<'a>> + Send
    where
        Self: 'a;
}

/// Map an observation back to the requirement it would satisfy.
///
/// This is what lets the observed state of the system be compared with the
/// required state of the system.
pub trait AsRequirement<Observation> {
    /// The requirement equivalent to this observation.
    type Requirement<'a>
    where
        Self: 'a;

    /// Express this observation as a requirement.
    fn as_requirement<'a>(&self) -> Self::Requirement<'a>
    where
        Self: 'a;
}

/// Drive an external resource into its required condition, creating or
/// removing it entirely where needed.
///
/// `Reconcile` differs from [`Update`] in that it commonly creates and
/// removes resources, while `Update` mostly mutates extant ones.
pub trait Reconcile {
    /// The data needed to describe the required state.
    type Requirement<'a>
    where
        Self: 'a;

    /// The observed state of the resource being reconciled.
    type Observation<'a>
    where
        Self: 'a;

    /// Any data returned by the reconcile operation.
    type Outcome<'a>
    where
        Self: 'a;

    /// Move the observed resource closer to the requirement.
    ///
    /// # Contract
    ///
    /// As with [`Update::update`], full convergence in one call is not
    /// promised; repeated observe/reconcile passes converge.
    fn reconcile<'a>(
        &self,
        requirement: Self::Requirement<'a>,
        observation: Self::Observation<'a>,
    ) -> impl Future<Output = Self::Outcome<'a>> + Send
    where
        Self: 'a;
}

/// The operation a reconcile pass chose to perform, with its outcome.
///
/// Useful as the `Outcome` type of [`Reconcile`].
pub enum Op<'a, H: 'a + Create + Update + Remove> {
    /// The resource was absent and had to be created.
    Create(<H as Create>::Outcome<'a>),
    /// The resource existed but drifted and was updated.
    Update(<H as Update>::Outcome<'a>),
    /// The resource existed but is no longer required.
    Remove(<H as Remove>::Outcome<'a>),
}

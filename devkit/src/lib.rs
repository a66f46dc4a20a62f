/*!
# FleetWatch DevKit - Fixtures et harness de tests

Bibliothèque facilitant les tests du kernel FleetWatch avec:
- Builders d'arbres distants (systems, configurations, audit_logs...)
- Harness câblant gateway mémoire + store + commandes
- Assertions sur les projections Device et Audit
*/

pub mod fixtures;
pub mod test_utils;

pub use fixtures::{SystemBuilder, TreeBuilder};
pub use test_utils::TestHarness;

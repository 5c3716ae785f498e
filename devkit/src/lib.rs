/*!
# PuppetDB DevKit - Stubs et utilitaires pour les tests de l'exporter

Bibliothèque facilitant les tests de l'exporter sans PuppetDB réel :
- Stub HTTP des endpoints PuppetDB v4 (`nodes`, `reports/<hash>/metrics`)
- Fixtures JSON au format renvoyé par PuppetDB (champs `null` compris)
- Harness de test avec expectations sur les requêtes reçues
*/

pub mod fixtures;
pub mod stub_server;
pub mod test_utils;

pub use fixtures::{report_metric, NodeFixture};
pub use stub_server::{RecordedRequest, StubPuppetDb};
pub use test_utils::TestHarness;

use std::sync::Arc;
use treadle::Workflow;

use crate::anchors::AnchorStage;
use crate::assemble::AssembleStage;
use crate::config::Config;
use crate::embed::EmbeddingExtractor;
use crate::lattice::LatticeStage;

/// Build the lattice → anchors → assemble pipeline.
///
/// # Errors
/// Returns an error if the workflow cannot be built.
pub fn build_pipeline(
    config: Config,
    extractor: Arc<EmbeddingExtractor>,
) -> treadle::Result<Workflow> {
    let lattice_stage = LatticeStage::new(config.clone(), Arc::clone(&extractor));
    let anchor_stage = AnchorStage::new(config.clone(), Arc::clone(&extractor));
    let assemble_stage = AssembleStage::new(config, extractor);

    Workflow::builder()
        .stage("lattice", lattice_stage)
        .stage("anchors", anchor_stage)
        .stage("assemble", assemble_stage)
        .dependency("anchors", "lattice")
        .dependency("assemble", "anchors")
        .build()
}

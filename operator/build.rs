use kube::CustomResourceExt;
use kubernaut_types::*;
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    for (path, crd) in [
        ("../crds/kubernaut.io_aianalyses.yaml", AIAnalysis::crd()),
        (
            "../crds/kubernaut.io_workflowexecutions.yaml",
            WorkflowExecution::crd(),
        ),
        (
            "../crds/kubernaut.io_notificationrequests.yaml",
            NotificationRequest::crd(),
        ),
        (
            "../crds/kubernaut.io_remediationapprovals.yaml",
            RemediationApproval::crd(),
        ),
        ("../crds/kubernaut.io_pipelineruns.yaml", PipelineRun::crd()),
    ] {
        fs::write(path, serde_yaml::to_string(&crd).unwrap()).unwrap();
    }
}

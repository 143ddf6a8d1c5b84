use audit_scanner::crd::{AdmissionPolicy, ClusterAdmissionPolicy};
use audit_scanner::report::model::{ClusterReport, NamespacedReport};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ListParams;
use kube::{Api, Client};

pub async fn run() -> anyhow::Result<()> {
    println!("Running cluster connectivity checks...\n");

    print!("  Kubeconfig .................. ");
    let client = match Client::try_default().await {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot load kubeconfig: {}", e);
        }
    };

    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            println!("\n  Error: {}", e);
            println!("  Hint:  Is the cluster running? Check with: kubectl cluster-info\n");
            return Ok(());
        }
    }

    print!("  List namespaces permission ... ");
    let namespaces: Api<Namespace> = Api::all(client.clone());
    match namespaces.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({e})"),
    }

    print!("  List ClusterAdmissionPolicy .. ");
    let cluster_policies: Api<ClusterAdmissionPolicy> = Api::all(client.clone());
    match cluster_policies.list(&ListParams::default().limit(1)).await {
        Ok(list) => println!("OK ({} found)", list.items.len()),
        Err(e) => println!("FAIL ({e})"),
    }

    print!("  List AdmissionPolicy ......... ");
    let namespaced_policies: Api<AdmissionPolicy> = Api::all(client.clone());
    match namespaced_policies.list(&ListParams::default().limit(1)).await {
        Ok(list) => println!("OK ({} found)", list.items.len()),
        Err(e) => println!("FAIL ({e})"),
    }

    print!("  Write ClusterPolicyReport .... ");
    let cluster_reports: Api<ClusterReport> = Api::all(client.clone());
    match cluster_reports.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({e})"),
    }

    print!("  Write PolicyReport ........... ");
    let namespaced_reports: Api<NamespacedReport> = Api::all(client);
    match namespaced_reports.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({e})"),
    }

    println!("\nAll checks completed.");
    Ok(())
}

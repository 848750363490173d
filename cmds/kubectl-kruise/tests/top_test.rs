//! `top clone` against the HTTP mock server.

use assert_matches::assert_matches;
use k8s_mock::{HttpMockK8sServer, MockApiResource, MockDiscovery, RunningHttpMockK8sServer};
use kubectl_kruise::{
	k8s::{
		client::{ClusterConnection, ConnectionOptions},
		store::ClusterStore,
	},
	top::{collect_usage, print_usage, SortBy, TopError, TopOptions},
};
use serde_json::{json, Value};

fn cloneset(name: &str, namespace: &str) -> Value {
	json!({
		"apiVersion": "apps.kruise.io/v1alpha1",
		"kind": "CloneSet",
		"metadata": {"name": name, "namespace": namespace},
		"spec": {"template": {"metadata": {"labels": {"app": name}}}}
	})
}

fn pod(name: &str, namespace: &str, app: &str) -> Value {
	json!({
		"apiVersion": "v1",
		"kind": "Pod",
		"metadata": {"name": name, "namespace": namespace, "labels": {"app": app}}
	})
}

fn pod_metrics(name: &str, namespace: &str, cpu: &str, memory: &str) -> Value {
	json!({
		"apiVersion": "metrics.k8s.io/v1beta1",
		"kind": "PodMetrics",
		"metadata": {"name": name, "namespace": namespace},
		"timestamp": "2024-01-01T00:00:00Z",
		"window": "30s",
		"containers": [{"name": "app", "usage": {"cpu": cpu, "memory": memory}}]
	})
}

fn metrics_discovery() -> MockDiscovery {
	MockDiscovery::default().with_resource(
		"metrics.k8s.io/v1beta1",
		MockApiResource::read_only("pods", "PodMetrics"),
	)
}

async fn start(discovery: MockDiscovery, resources: Vec<Value>) -> RunningHttpMockK8sServer {
	HttpMockK8sServer::builder()
		.discovery(discovery)
		.resources(resources)
		.build()
		.start()
		.await
}

async fn store_for(server: &RunningHttpMockK8sServer) -> ClusterStore {
	let conn = ClusterConnection::connect_with_kubeconfig(
		&ConnectionOptions::default(),
		server.kubeconfig(),
	)
	.await
	.expect("connection should succeed");
	ClusterStore::discover(&conn)
		.await
		.expect("discovery should succeed")
}

fn opts(name: Option<&str>) -> TopOptions {
	TopOptions {
		name: name.map(str::to_string),
		namespace: "default".to_string(),
		..TopOptions::default()
	}
}

#[tokio::test]
async fn test_top_named_cloneset() {
	let server = start(
		metrics_discovery(),
		vec![
			cloneset("web", "default"),
			pod("web-a", "default", "web"),
			pod("web-b", "default", "web"),
			pod("other", "default", "api"),
			pod_metrics("web-a", "default", "12345678n", "20Mi"),
			pod_metrics("web-b", "default", "300m", "96Mi"),
			pod_metrics("other", "default", "1", "1Gi"),
		],
	)
	.await;
	let store = store_for(&server).await;

	let opts = TopOptions {
		sort_by: Some(SortBy::Cpu),
		..opts(Some("web"))
	};
	let usage = collect_usage(&store, &opts).await.expect("metrics are served");

	let mut out = Vec::new();
	print_usage(&mut out, &usage, &opts).expect("write table");
	assert_eq!(
		String::from_utf8(out).expect("utf-8"),
		"NAME   CPU(cores)  MEMORY(bytes)\n\
		 web-b  300m        96Mi\n\
		 web-a  13m         20Mi\n"
	);
}

#[tokio::test]
async fn test_top_across_namespaces() {
	let server = start(
		metrics_discovery(),
		vec![
			cloneset("web", "default"),
			cloneset("api", "prod"),
			pod("web-a", "default", "web"),
			pod("api-a", "prod", "api"),
			pod_metrics("web-a", "default", "5m", "10Mi"),
			pod_metrics("api-a", "prod", "7m", "30Mi"),
		],
	)
	.await;
	let store = store_for(&server).await;

	let opts = TopOptions {
		all_namespaces: true,
		sort_by: Some(SortBy::Memory),
		..opts(None)
	};
	let usage = collect_usage(&store, &opts).await.expect("metrics are served");
	let rows: Vec<_> = usage
		.iter()
		.map(|u| (u.namespace.as_str(), u.name.as_str()))
		.collect();
	assert_eq!(rows, vec![("prod", "api-a"), ("default", "web-a")]);
}

#[tokio::test]
async fn test_top_without_metrics_api() {
	let server = start(MockDiscovery::default(), vec![cloneset("web", "default")]).await;
	let store = store_for(&server).await;

	let err = collect_usage(&store, &opts(Some("web"))).await.unwrap_err();
	assert_matches!(err, TopError::MetricsUnavailable);
	assert_eq!(err.to_string(), "Metrics API not available");
}

#[tokio::test]
async fn test_top_missing_cloneset() {
	let server = start(metrics_discovery(), vec![]).await;
	let store = store_for(&server).await;

	assert_matches!(
		collect_usage(&store, &opts(Some("web"))).await,
		Err(TopError::CloneSet { name, .. }) if name == "web"
	);
}

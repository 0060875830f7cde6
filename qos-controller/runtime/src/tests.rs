use crate::{
    controller::Controller,
    core::{
        owner::{OBJECT_NAME_KEY, OWNER_CONTROLLER_KEY, OWNER_TYPE_KEY, PRIMARY_ID_KEY},
        workqueue::{FastSlow, QueueMetrics},
        KeyedLock, OwnerId, OwnerType, ReconciliationKey, ResourceId, WorkQueue,
    },
    health,
    healthcheck::{self, Health, Listen},
    index::{ClusterInfo, Index, Queues, ServiceHealthIndex, SharedIndex},
    k8s::{
        self,
        annotations::{POD_NETWORKS_ANNOTATION, ZONE_ANNOTATION},
        labels::Selector,
        network_qos::{NetworkQoSSpec, Rule},
    },
    metrics::ReconcileMetrics,
    nbdb::{
        memory::Database,
        model::{AddressSet, LogicalSwitch, LogicalSwitchPort, PortGroup, Qos, Uuid},
    },
    reconcile::Reconciler,
    repair,
    synthesize::QosSynthesizer,
    workers,
};
use kubert::index::{
    ClusterRemoved, IndexClusterResource, IndexNamespacedResource, NamespacedRemoved,
};
use maplit::{btreemap, btreeset};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::{collections::BTreeMap, io, sync::Arc};
use tokio::time::{self, Duration};

const CONTROLLER: &str = "ctl";
const LOCAL_ZONE: &str = "zone-a";

#[tokio::test]
async fn reconciles_selected_local_pods() {
    let (index, db, ports) = mk_cluster();
    let reconciler = mk_reconciler(&index, &db);

    reconciler.reconcile(&key("ns-0", "qos-0")).await.unwrap();
    assert_eq!(db.transactions(), 1);

    // Only the running pod scheduled in the local zone is selected.
    let pgs = db.rows::<PortGroup>();
    assert_eq!(pgs.len(), 1);
    assert_eq!(pgs[0].ports, btreeset! { Uuid(ports["pod-0"].clone()) });
    assert_eq!(
        pgs[0].external_ids[PRIMARY_ID_KEY],
        "ctl:ns-0:qos-0:pg".to_string()
    );
    assert_eq!(
        db.rows::<AddressSet>()[0].addresses,
        btreeset! { "10.0.0.5".to_string() }
    );
    let qos = db.rows::<Qos>();
    assert_eq!(qos.len(), 1);
    assert_eq!(qos[0].action, btreemap! { "dscp".to_string() => 46 });
    assert_eq!(qos[0].direction, "from-lport");
    assert_eq!(
        switch(&db, "node-0").qos_rules,
        btreeset! { Uuid(qos[0].uuid.clone()) }
    );

    // Nothing changed, so nothing is written.
    reconciler.reconcile(&key("ns-0", "qos-0")).await.unwrap();
    assert_eq!(db.transactions(), 1);
    assert_eq!(db.rows::<Qos>(), qos);
}

#[tokio::test]
async fn moves_qos_rows_between_switches() {
    let (index, db, _) = mk_cluster();
    let reconciler = mk_reconciler(&index, &db);
    reconciler.reconcile(&key("ns-0", "qos-0")).await.unwrap();
    let qos = db.rows::<Qos>().remove(0);

    apply_cluster(&index, mk_node("node-2", LOCAL_ZONE));
    db.seed(&LogicalSwitch {
        name: "node-2".to_string(),
        ..Default::default()
    });
    apply_namespaced(&index, mk_pod("ns-0", "pod-0", "2", "node-2", "web", "10.0.0.5"));
    reconciler.reconcile(&key("ns-0", "qos-0")).await.unwrap();
    assert_eq!(db.transactions(), 2);

    assert!(switch(&db, "node-0").qos_rules.is_empty());
    assert_eq!(
        switch(&db, "node-2").qos_rules,
        btreeset! { Uuid(qos.uuid.clone()) }
    );
    assert_eq!(db.rows::<Qos>(), vec![qos]);
}

#[tokio::test]
async fn withholds_qos_rows_without_a_switch() {
    let (index, db, _) = mk_cluster();
    let reconciler = mk_reconciler(&index, &db);
    apply_cluster(&index, mk_node("node-3", LOCAL_ZONE));
    let port = db.seed(&LogicalSwitchPort {
        name: "ns-0_pod-3".to_string(),
        ..Default::default()
    });
    apply_namespaced(&index, mk_pod("ns-0", "pod-0", "2", "node-0", "db", "10.0.0.5"));
    apply_namespaced(&index, mk_pod("ns-0", "pod-3", "1", "node-3", "web", "10.0.0.8"));

    reconciler.reconcile(&key("ns-0", "qos-0")).await.unwrap();
    assert_eq!(db.transactions(), 1);
    assert_eq!(db.rows::<PortGroup>()[0].ports, btreeset! { Uuid(port) });
    assert!(db.rows::<Qos>().is_empty());

    // Unattached rows would be collected on every commit and inserted again; none are written.
    reconciler.reconcile(&key("ns-0", "qos-0")).await.unwrap();
    assert_eq!(db.transactions(), 1);
}

#[tokio::test]
async fn updates_rows_in_place() {
    let (index, db, ports) = mk_cluster();
    let reconciler = mk_reconciler(&index, &db);
    reconciler.reconcile(&key("ns-0", "qos-0")).await.unwrap();
    let pg_uuid = db.rows::<PortGroup>()[0].uuid.clone();

    apply_namespaced(
        &index,
        mk_policy("ns-0", "qos-0", "2", vec![mk_rule(10, &[]), mk_rule(18, &["10.1.0.0/16"])]),
    );
    apply_namespaced(&index, mk_pod("ns-0", "pod-2", "2", "node-0", "web", "10.0.0.7"));
    reconciler.reconcile(&key("ns-0", "qos-0")).await.unwrap();
    assert_eq!(db.transactions(), 2);

    let pgs = db.rows::<PortGroup>();
    assert_eq!(pgs.len(), 1);
    assert_eq!(pgs[0].uuid, pg_uuid);
    assert_eq!(
        pgs[0].ports,
        btreeset! { Uuid(ports["pod-0"].clone()), Uuid(ports["pod-2"].clone()) }
    );

    let mut dscps = db
        .rows::<Qos>()
        .into_iter()
        .map(|q| q.action["dscp"])
        .collect::<Vec<_>>();
    dscps.sort();
    assert_eq!(dscps, vec![10, 18]);
    assert_eq!(switch(&db, "node-0").qos_rules.len(), 2);
}

#[tokio::test]
async fn tears_down_deleted_policies() {
    let (index, db, _) = mk_cluster();
    let reconciler = mk_reconciler(&index, &db);
    reconciler.reconcile(&key("ns-0", "qos-0")).await.unwrap();

    // Rows written by another controller for the same policy are not ours to remove.
    let mut foreign = mk_owned_port_group("ns-0:qos-0");
    foreign
        .external_ids
        .insert(OWNER_CONTROLLER_KEY.to_string(), "other".to_string());
    db.seed(&foreign);

    IndexNamespacedResource::<k8s::NetworkQoS>::delete(
        &mut *index.write(),
        "ns-0".to_string(),
        "qos-0".to_string(),
    );
    reconciler.reconcile(&key("ns-0", "qos-0")).await.unwrap();
    assert_eq!(db.transactions(), 2);
    let pgs = db.rows::<PortGroup>();
    assert_eq!(pgs.len(), 1);
    assert_eq!(pgs[0].external_ids[OWNER_CONTROLLER_KEY], "other");
    assert!(db.rows::<AddressSet>().is_empty());
    assert!(db.rows::<Qos>().is_empty());
    assert!(switch(&db, "node-0").qos_rules.is_empty());

    reconciler.reconcile(&key("ns-0", "qos-0")).await.unwrap();
    assert_eq!(db.transactions(), 2);
}

#[tokio::test]
async fn skips_pods_without_logical_ports() {
    let (index, db, _) = mk_cluster();
    let reconciler = mk_reconciler(&index, &db);
    apply_namespaced(&index, mk_pod("ns-0", "pod-9", "1", "node-0", "web", "10.0.0.9"));

    reconciler.reconcile(&key("ns-0", "qos-0")).await.unwrap();
    assert_eq!(db.rows::<PortGroup>()[0].ports.len(), 1);
    assert_eq!(
        db.rows::<AddressSet>()[0].addresses,
        btreeset! { "10.0.0.5".to_string() }
    );
}

#[tokio::test]
async fn reports_failed_transactions() {
    let (index, db, _) = mk_cluster();
    let reconciler = mk_reconciler(&index, &db);

    db.fail_transactions(1);
    assert!(reconciler.reconcile(&key("ns-0", "qos-0")).await.is_err());
    assert!(db.rows::<PortGroup>().is_empty());

    reconciler.reconcile(&key("ns-0", "qos-0")).await.unwrap();
    assert_eq!(db.rows::<PortGroup>().len(), 1);
}

#[tokio::test]
async fn repair_removes_orphaned_rows() {
    let (index, db, _) = mk_cluster();
    let reconciler = mk_reconciler(&index, &db);

    let live = db.seed(&mk_owned_port_group("ns-0:qos-0"));
    let orphan = db.seed(&mk_owned_port_group("ns-0:gone"));
    let malformed = db.seed(&mk_owned_port_group("gone"));
    let mut foreign = mk_owned_port_group("ns-0:gone");
    foreign
        .external_ids
        .insert(OWNER_CONTROLLER_KEY.to_string(), "other".to_string());
    let foreign = db.seed(&foreign);
    let mut netpol = mk_owned_port_group("ns-0:gone");
    netpol.external_ids.insert(
        OWNER_TYPE_KEY.to_string(),
        OwnerType::NetworkPolicy.as_str().to_string(),
    );
    let netpol = db.seed(&netpol);
    let orphan_qos = db.seed(&Qos {
        external_ids: owner_ids("ns-0:gone"),
        ..Default::default()
    });
    db.seed(&LogicalSwitch {
        name: "node-9".to_string(),
        qos_rules: btreeset! { Uuid(orphan_qos.clone()) },
        ..Default::default()
    });

    assert_eq!(repair::repair(&reconciler).await.unwrap(), 2);
    assert_eq!(db.transactions(), 1);
    let mut remaining = db
        .rows::<PortGroup>()
        .into_iter()
        .map(|pg| pg.uuid)
        .collect::<Vec<_>>();
    remaining.sort();
    let mut expected = vec![live, malformed, foreign, netpol];
    expected.sort();
    assert_eq!(remaining, expected);
    assert!(!db.rows::<PortGroup>().iter().any(|pg| pg.uuid == orphan));
    assert!(!db.rows::<Qos>().iter().any(|q| q.uuid == orphan_qos));
    assert!(switch(&db, "node-9").qos_rules.is_empty());

    // Nothing is left to repair.
    assert_eq!(repair::repair(&reconciler).await.unwrap(), 0);
    assert_eq!(db.transactions(), 1);
}

#[tokio::test(start_paused = true)]
async fn workers_drop_items_after_max_requeues() {
    let (index, db, _) = mk_cluster();
    let reconciler = mk_reconciler(&index, &db);
    db.seed(&mk_owned_port_group("ns-0:gone"));

    let queue = WorkQueue::new("networkqos", FastSlow::default(), &QueueMetrics::default());
    let worker = tokio::spawn(workers::run(
        queue.clone(),
        reconciler,
        KeyedLock::default(),
        workers::policy,
    ));

    // One attempt plus the maximum number of requeues.
    db.fail_transactions(1 + workers::MAX_REQUEUES as usize);
    queue.add(key("ns-0", "gone"), ());
    time::sleep(Duration::from_secs(120)).await;
    assert_eq!(db.rows::<PortGroup>().len(), 1);
    assert_eq!(db.transactions(), 0);
    assert_eq!(queue.num_requeues(&key("ns-0", "gone")), 0);

    // The injected failures are used up, so the next attempt converges immediately.
    queue.add(key("ns-0", "gone"), ());
    time::sleep(Duration::from_millis(100)).await;
    assert!(db.rows::<PortGroup>().is_empty());
    assert_eq!(db.transactions(), 1);

    queue.shutdown();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn workers_retry_failed_items() {
    let (index, db, _) = mk_cluster();
    let reconciler = mk_reconciler(&index, &db);
    let queue = WorkQueue::new("networkqos", FastSlow::default(), &QueueMetrics::default());
    let worker = tokio::spawn(workers::run(
        queue.clone(),
        reconciler,
        KeyedLock::default(),
        workers::policy,
    ));

    db.fail_transactions(2);
    queue.add(key("ns-0", "qos-0"), ());
    time::sleep(Duration::from_millis(1500)).await;
    assert!(db.rows::<PortGroup>().is_empty());

    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(db.rows::<PortGroup>().len(), 1);
    assert_eq!(queue.num_requeues(&key("ns-0", "qos-0")), 0);

    queue.shutdown();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn pod_events_reconcile_selecting_policies() {
    let (index, db, ports) = mk_cluster();
    let reconciler = mk_reconciler(&index, &db);
    let queues = index.read().queues().clone();
    // Drop the events queued while the cluster was built.
    while !queues.pods.is_empty() {
        let (pod, _) = queues.pods.get().await.unwrap();
        queues.pods.done(&pod);
    }

    let worker = tokio::spawn(workers::run(
        queues.pods.clone(),
        reconciler,
        KeyedLock::default(),
        workers::pod,
    ));

    apply_namespaced(&index, mk_pod("ns-0", "pod-2", "2", "node-0", "web", "10.0.0.7"));
    time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        db.rows::<PortGroup>()[0].ports,
        btreeset! { Uuid(ports["pod-0"].clone()), Uuid(ports["pod-2"].clone()) }
    );

    // Relabeling a pod away from the selector still reconciles the policy that selected it.
    apply_namespaced(&index, mk_pod("ns-0", "pod-0", "2", "node-0", "db", "10.0.0.5"));
    time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        db.rows::<PortGroup>()[0].ports,
        btreeset! { Uuid(ports["pod-2"].clone()) }
    );
    assert_eq!(
        db.rows::<AddressSet>()[0].addresses,
        btreeset! { "10.0.0.7".to_string() }
    );

    queues.shutdown();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn controller_requires_synced_caches() {
    let (index, db, _) = mk_cluster();
    let controller = Controller::new(
        mk_reconciler(&index, &db),
        1,
        None,
        Duration::from_secs(60),
    );
    let (_signal, watch) = drain::channel();

    // Only node resets have been observed.
    IndexClusterResource::<k8s::Node>::reset(
        &mut *index.write(),
        vec![],
        ClusterRemoved::default(),
    );
    let error = controller.run(watch).await.unwrap_err();
    assert!(
        error.to_string().contains("networkqos, namespace, pod"),
        "{error}"
    );
    assert_eq!(db.transactions(), 0);
}

#[tokio::test(start_paused = true)]
async fn controller_repairs_and_reconciles() {
    let (index, db, ports) = mk_cluster();
    db.seed(&mk_owned_port_group("ns-0:gone"));
    mark_synced(&index);

    let controller = Controller::new(
        mk_reconciler(&index, &db),
        2,
        Some(Duration::from_secs(300)),
        Duration::from_secs(60),
    );
    let (signal, watch) = drain::channel();
    let task = tokio::spawn(controller.run(watch));
    time::sleep(Duration::from_secs(1)).await;

    let pgs = db.rows::<PortGroup>();
    assert_eq!(pgs.len(), 1);
    assert_eq!(pgs[0].ports, btreeset! { Uuid(ports["pod-0"].clone()) });
    let transactions = db.transactions();

    // A resync finds nothing to change.
    time::sleep(Duration::from_secs(300)).await;
    assert_eq!(db.transactions(), transactions);

    signal.drain().await;
    task.await.unwrap().unwrap();
    assert!(index.read().queues().policies.is_shutting_down());
}

#[tokio::test(start_paused = true)]
async fn health_checks_follow_the_index() {
    let updates = WorkQueue::new("healthcheck", FastSlow::default(), &QueueMetrics::default());
    let index = ServiceHealthIndex::shared("node-0", updates);
    IndexNamespacedResource::apply(&mut *index.write(), mk_service("a", "b", 9376));
    IndexNamespacedResource::apply(
        &mut *index.write(),
        mk_slice("a", "b-1", "b", &["node-0", "node-0", "node-1"]),
    );

    let listen = RecordingListen::default();
    let (signal, watch) = drain::channel();
    let task = tokio::spawn(health::run(
        index.clone(),
        healthcheck::Server::new(listen.clone()),
        watch,
    ));
    time::sleep(Duration::from_millis(100)).await;

    let health = listen.get(9376);
    assert_eq!(health.service(), &ResourceId::new("a", "b"));
    assert_eq!(health.endpoints(), 2);

    IndexNamespacedResource::apply(&mut *index.write(), mk_slice("a", "b-1", "b", &["node-1"]));
    time::sleep(Duration::from_millis(100)).await;
    assert_eq!(health.endpoints(), 0);

    signal.drain().await;
    task.await.unwrap();
}

// === helpers ===

/// Records the health of every listener opened.
#[derive(Clone, Default)]
struct RecordingListen(Arc<Mutex<BTreeMap<u16, Health>>>);

impl Listen for RecordingListen {
    type Handle = ();

    fn listen(&self, port: u16, health: Health) -> io::Result<()> {
        self.0.lock().insert(port, health);
        Ok(())
    }
}

impl RecordingListen {
    fn get(&self, port: u16) -> Health {
        self.0.lock().get(&port).cloned().expect("port must be open")
    }
}

fn key(ns: &str, name: &str) -> ReconciliationKey {
    ReconciliationKey::namespaced(ns, name)
}

fn mk_reconciler(index: &SharedIndex, db: &Database) -> Reconciler {
    Reconciler::new(
        index.clone(),
        Arc::new(db.clone()),
        CONTROLLER,
        Arc::new(QosSynthesizer::default()),
        ReconcileMetrics::default(),
    )
}

/// Builds an index with one policy selecting `app=web` pods in `ns-0`:
///
/// - `pod-0` is selected and scheduled on the local `node-0`;
/// - `pod-1` is selected but scheduled on `node-1`, in another zone;
/// - `pod-2` is local but not selected.
///
/// Every pod has a logical switch port in the returned database, and `node-0` has a logical
/// switch.
fn mk_cluster() -> (SharedIndex, Database, BTreeMap<&'static str, String>) {
    let queues = Queues::new(FastSlow::default(), &QueueMetrics::default());
    let index = Index::shared(
        ClusterInfo {
            zone: LOCAL_ZONE.to_string(),
            network: k8s::DEFAULT_NETWORK.to_string(),
        },
        queues,
    );
    apply_cluster(&index, mk_node("node-0", LOCAL_ZONE));
    apply_cluster(&index, mk_node("node-1", "zone-b"));
    apply_cluster(&index, mk_namespace("ns-0"));
    apply_namespaced(&index, mk_pod("ns-0", "pod-0", "1", "node-0", "web", "10.0.0.5"));
    apply_namespaced(&index, mk_pod("ns-0", "pod-1", "1", "node-1", "web", "10.0.1.5"));
    apply_namespaced(&index, mk_pod("ns-0", "pod-2", "1", "node-0", "db", "10.0.0.7"));
    apply_namespaced(&index, mk_policy("ns-0", "qos-0", "1", vec![mk_rule(46, &[])]));

    let db = Database::default();
    db.seed(&LogicalSwitch {
        name: "node-0".to_string(),
        ..Default::default()
    });
    let ports = ["pod-0", "pod-1", "pod-2"]
        .into_iter()
        .map(|pod| {
            let uuid = db.seed(&LogicalSwitchPort {
                name: format!("ns-0_{pod}"),
                ..Default::default()
            });
            (pod, uuid)
        })
        .collect();
    (index, db, ports)
}

fn switch(db: &Database, name: &str) -> LogicalSwitch {
    db.rows::<LogicalSwitch>()
        .into_iter()
        .find(|ls| ls.name == name)
        .expect("switch must exist")
}

fn mark_synced(index: &SharedIndex) {
    let mut index = index.write();
    IndexNamespacedResource::<k8s::NetworkQoS>::reset(
        &mut *index,
        vec![mk_policy("ns-0", "qos-0", "1", vec![mk_rule(46, &[])])],
        NamespacedRemoved::default(),
    );
    IndexClusterResource::<k8s::Namespace>::reset(
        &mut *index,
        vec![mk_namespace("ns-0")],
        ClusterRemoved::default(),
    );
    IndexNamespacedResource::<k8s::Pod>::reset(
        &mut *index,
        vec![
            mk_pod("ns-0", "pod-0", "1", "node-0", "web", "10.0.0.5"),
            mk_pod("ns-0", "pod-1", "1", "node-1", "web", "10.0.1.5"),
            mk_pod("ns-0", "pod-2", "1", "node-0", "db", "10.0.0.7"),
        ],
        NamespacedRemoved::default(),
    );
    IndexClusterResource::<k8s::Node>::reset(
        &mut *index,
        vec![mk_node("node-0", LOCAL_ZONE), mk_node("node-1", "zone-b")],
        ClusterRemoved::default(),
    );
}

fn apply_namespaced<T>(index: &SharedIndex, resource: T)
where
    Index: IndexNamespacedResource<T>,
{
    IndexNamespacedResource::apply(&mut *index.write(), resource)
}

fn apply_cluster<T>(index: &SharedIndex, resource: T)
where
    Index: IndexClusterResource<T>,
{
    IndexClusterResource::apply(&mut *index.write(), resource)
}

fn owner_ids(owner_name: &str) -> BTreeMap<String, String> {
    let (ns, name) = owner_name.split_once(':').unwrap_or(("", owner_name));
    let mut ids = OwnerId::namespaced(OwnerType::NetworkQos, ResourceId::new(ns, name))
        .unwrap()
        .external_ids(CONTROLLER);
    ids.insert(OBJECT_NAME_KEY.to_string(), owner_name.to_string());
    ids.insert(
        PRIMARY_ID_KEY.to_string(),
        format!("{CONTROLLER}:{owner_name}:pg"),
    );
    ids
}

fn mk_owned_port_group(owner_name: &str) -> PortGroup {
    PortGroup {
        name: format!("pg-{owner_name}"),
        external_ids: owner_ids(owner_name),
        ..Default::default()
    }
}

fn mk_meta(ns: Option<&str>, name: &str, resource_version: &str) -> k8s::ObjectMeta {
    k8s::ObjectMeta {
        namespace: ns.map(Into::into),
        name: Some(name.to_string()),
        resource_version: Some(resource_version.to_string()),
        ..Default::default()
    }
}

fn mk_rule(dscp: u8, to: &[&str]) -> Rule {
    Rule {
        dscp,
        classifier: (!to.is_empty()).then(|| k8s::network_qos::Classifier {
            to: to.iter().map(|c| c.to_string()).collect(),
        }),
        bandwidth: None,
    }
}

fn mk_policy(ns: &str, name: &str, resource_version: &str, egress: Vec<Rule>) -> k8s::NetworkQoS {
    let mut policy = k8s::NetworkQoS::new(
        name,
        NetworkQoSSpec {
            network_attachment_refs: None,
            namespace_selector: None,
            pod_selector: Selector::from_map(btreemap! { "app".to_string() => "web".to_string() }),
            priority: 100,
            egress,
        },
    );
    policy.metadata = mk_meta(Some(ns), name, resource_version);
    policy
}

fn mk_namespace(name: &str) -> k8s::Namespace {
    k8s::Namespace {
        metadata: mk_meta(None, name, "1"),
        ..Default::default()
    }
}

fn mk_node(name: &str, zone: &str) -> k8s::Node {
    let mut meta = mk_meta(None, name, "1");
    meta.annotations = Some(btreemap! { ZONE_ANNOTATION.to_string() => zone.to_string() });
    k8s::Node {
        metadata: meta,
        ..Default::default()
    }
}

fn mk_pod(
    ns: &str,
    name: &str,
    resource_version: &str,
    node: &str,
    app: &str,
    ip: &str,
) -> k8s::Pod {
    let mut meta = mk_meta(Some(ns), name, resource_version);
    meta.labels = Some(btreemap! { "app".to_string() => app.to_string() });
    let networks =
        serde_json::json!({ k8s::DEFAULT_NETWORK: { "ip_addresses": [format!("{ip}/24")] } });
    meta.annotations =
        Some(btreemap! { POD_NETWORKS_ANNOTATION.to_string() => networks.to_string() });
    k8s::Pod {
        metadata: meta,
        spec: Some(k8s::PodSpec {
            node_name: Some(node.to_string()),
            ..Default::default()
        }),
        status: Some(k8s::PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

fn mk_service(ns: &str, name: &str, port: i32) -> k8s::Service {
    k8s::Service {
        metadata: mk_meta(Some(ns), name, "1"),
        spec: Some(k8s::ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            external_traffic_policy: Some("Local".to_string()),
            health_check_node_port: Some(port),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mk_slice(ns: &str, name: &str, service: &str, nodes: &[&str]) -> k8s::EndpointSlice {
    let mut meta = mk_meta(Some(ns), name, "1");
    meta.labels = Some(btreemap! { k8s::SERVICE_NAME_LABEL.to_string() => service.to_string() });
    k8s::EndpointSlice {
        metadata: meta,
        address_type: "IPv4".to_string(),
        endpoints: nodes
            .iter()
            .map(|node| k8s::Endpoint {
                addresses: vec!["10.0.0.1".to_string()],
                node_name: Some(node.to_string()),
                conditions: Some(k8s::EndpointConditions {
                    ready: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect(),
        ports: None,
    }
}

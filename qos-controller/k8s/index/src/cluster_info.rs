/// Holds the metadata that scopes this controller's share of the cluster.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// The zone this controller programs. Only pods on nodes in this zone are handled.
    pub zone: String,

    /// The network whose pod addresses and policies are handled, e.g. "default".
    pub network: String,
}

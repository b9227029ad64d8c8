//! Code for reading the connectivity tables: mine to beneficiation connections, priority mines and
//! the facility network.
use super::*;
use crate::graph::NetworkEdge;
use crate::id::Moniker;
use crate::layer::combo::Connections;
use serde::Deserialize;

const CONNECTIONS_FILE_NAME: &str = "mine_beneficiation_connections.csv";
const PRIORITY_MINES_FILE_NAME: &str = "priority_mines.csv";
const NETWORK_FILE_NAME: &str = "network.csv";

#[derive(Deserialize)]
struct ConnectionRow {
    mine_location: String,
    beneficiation_location: String,
    #[serde(default)]
    weight: Option<f64>,
}

#[derive(Deserialize)]
struct PriorityMineRow {
    location: String,
}

#[derive(Deserialize)]
struct NetworkEdgeRow {
    upstream: Moniker,
    downstream: Moniker,
    means: String,
    cost: f64,
}

/// Read which mine locations may feed which beneficiation locations
pub fn read_connections(model_dir: &Path) -> Result<Connections> {
    let file_path = model_dir.join(CONNECTIONS_FILE_NAME);
    let rows: Vec<ConnectionRow> = read_csv(&file_path)?;

    let mut connections = Connections::default();
    for row in rows {
        if let Some(weight) = row.weight {
            ensure!(
                weight.is_finite(),
                "Connection weight between {} and {} must be finite",
                row.mine_location,
                row.beneficiation_location
            );
        }
        connections.insert(row.mine_location, row.beneficiation_location, row.weight);
    }

    Ok(connections)
}

/// Read the locations of mines which are always part of a scenario. The file is optional.
pub fn read_priority_mines(model_dir: &Path) -> Result<Vec<String>> {
    let file_path = model_dir.join(PRIORITY_MINES_FILE_NAME);
    let rows: Vec<PriorityMineRow> = read_csv_optional(&file_path)?;

    Ok(rows.into_iter().map(|row| row.location).unique().collect())
}

/// Read the edges of the facility network. The file is optional.
pub fn read_network_edges(model_dir: &Path) -> Result<Vec<NetworkEdge>> {
    let file_path = model_dir.join(NETWORK_FILE_NAME);
    let rows: Vec<NetworkEdgeRow> = read_csv_optional(&file_path)?;

    rows.into_iter()
        .map(|row| {
            ensure!(
                row.cost.is_finite(),
                "Cost of edge from {} to {} must be finite",
                row.upstream,
                row.downstream
            );
            Ok(NetworkEdge {
                upstream: row.upstream,
                downstream: row.downstream,
                means: row.means,
                cost: row.cost,
            })
        })
        .try_collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_read_connections() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONNECTIONS_FILE_NAME),
            "mine_location,beneficiation_location,weight\nKhouribga,Jorf,1\nKhouribga,Safi,\n\
            Gantour,Safi,0\n",
        )
        .unwrap();

        let connections = read_connections(dir.path()).unwrap();
        assert!(connections.is_connected("Khouribga", "Jorf"));
        assert!(!connections.is_connected("Khouribga", "Safi"));
        assert!(!connections.is_connected("Gantour", "Safi"));
        assert!(!connections.is_connected("Benguerir", "Jorf"));
        assert!(connections.has_mine_location("Gantour"));
    }

    #[test]
    fn test_read_priority_mines_optional() {
        let dir = tempdir().unwrap();
        assert!(read_priority_mines(dir.path()).unwrap().is_empty());

        fs::write(
            dir.path().join(PRIORITY_MINES_FILE_NAME),
            "location\nKhouribga\nKhouribga\nGantour\n",
        )
        .unwrap();
        assert_eq!(
            read_priority_mines(dir.path()).unwrap(),
            ["Khouribga", "Gantour"]
        );
    }

    #[test]
    fn test_read_network_edges() {
        let dir = tempdir().unwrap();
        assert!(read_network_edges(dir.path()).unwrap().is_empty());

        fs::write(
            dir.path().join(NETWORK_FILE_NAME),
            "upstream,downstream,means,cost\na/b,c/d,Pipe,2.5\n",
        )
        .unwrap();
        let edges = read_network_edges(dir.path()).unwrap();
        assert_eq!(
            edges,
            [NetworkEdge {
                upstream: "a/b".into(),
                downstream: "c/d".into(),
                means: "Pipe".into(),
                cost: 2.5
            }]
        );
    }
}

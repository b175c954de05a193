// Aligned-column console output for clusters, templates and quotas.
// The adapters only produce values; all formatting happens here.

use crate::models::{Cluster, ClusterTemplate, Quotas};

const COLUMN_GAP: usize = 3;

pub fn write_cluster(cluster: &Cluster) {
    write_clusters(std::slice::from_ref(cluster));
}

pub fn write_clusters(clusters: &[Cluster]) {
    let mut rows = vec![vec![
        "ClusterName".to_string(),
        "Flavor".to_string(),
        "Nodes".to_string(),
        "Status".to_string(),
    ]];
    for cluster in clusters {
        rows.push(vec![
            cluster.name.clone(),
            cluster
                .template
                .as_ref()
                .map(|t| t.name.clone())
                .unwrap_or_default(),
            cluster.nodes.clone(),
            cluster.status.clone(),
        ]);
    }
    print!("{}", format_table(&rows));
}

pub fn write_templates(templates: &[ClusterTemplate]) {
    let mut rows = vec![vec![
        "Name".to_string(),
        "COE".to_string(),
        "HostType".to_string(),
    ]];
    for template in templates {
        rows.push(vec![
            template.name.clone(),
            template.coe.clone(),
            template.host_type.clone(),
        ]);
    }
    print!("{}", format_table(&rows));
}

pub fn write_quotas(quotas: &Quotas) {
    let rows = vec![
        vec!["MaxClusters".to_string(), "MaxNodesPerCluster".to_string()],
        vec![
            quotas.max_clusters.to_string(),
            quotas.max_nodes_per_cluster.to_string(),
        ],
    ];
    print!("{}", format_table(&rows));
}

fn format_table(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0; columns];
    for row in rows {
        for (i, field) in row.iter().enumerate() {
            widths[i] = widths[i].max(field.len());
        }
    }

    let mut output = String::new();
    for row in rows {
        let mut line = String::new();
        for (i, field) in row.iter().enumerate() {
            if i + 1 == row.len() {
                line.push_str(field);
            } else {
                line.push_str(&format!("{:width$}", field, width = widths[i] + COLUMN_GAP));
            }
        }
        output.push_str(line.trim_end());
        output.push('\n');
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_table_aligns_columns() {
        let rows = vec![
            vec!["Name".to_string(), "Status".to_string()],
            vec!["a-long-cluster-name".to_string(), "active".to_string()],
            vec!["tiny".to_string(), "building".to_string()],
        ];
        let table = format_table(&rows);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        let status_column = lines[1].find("active").unwrap();
        assert_eq!(lines[2].find("building").unwrap(), status_column);
    }

    #[test]
    fn test_format_table_handles_empty_input() {
        assert_eq!(format_table(&[]), "");
    }
}

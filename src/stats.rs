///! Data-quality statistics and issue log
///!
///! Recoverable data problems are recorded here instead of failing the
///! build. Each tile worker keeps its own copy; the driver merges them
///! after the join and reports at the end of the run.

use std::fmt;

/// Degree histogram buckets; the last bucket saturates.
pub const MAX_DEGREE_BUCKETS: usize = 128;

/// A recorded, non-fatal data issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    /// A link BFS found fewer than 2 non-link boundary classes.
    UnconnectedLinkEdge { way_id: u64 },
    /// Two edges from one node share an endpoint and length but come from
    /// different ways.
    DuplicateWay { way_id1: u64, way_id2: u64 },
    /// Link reclassification expanded onto a non-link edge.
    NonLinkExpansion { way_id: u64 },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::UnconnectedLinkEdge { way_id } => {
                write!(f, "unconnected link edge (way {})", way_id)
            }
            Issue::DuplicateWay { way_id1, way_id2 } => {
                write!(f, "duplicate ways {} and {}", way_id1, way_id2)
            }
            Issue::NonLinkExpansion { way_id } => {
                write!(f, "expanded onto non-link edge (way {})", way_id)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataQuality {
    pub not_thru_count: u64,
    pub internal_count: u64,
    pub turn_channel_count: u64,
    pub culdesac_count: u64,
    pub timed_restrictions: u64,
    pub simple_restrictions: u64,
    pub reclassified_links: u64,
    /// Node count by directed-edge degree.
    pub node_counts: Vec<u64>,
    pub issues: Vec<Issue>,
}

impl Default for DataQuality {
    fn default() -> DataQuality {
        DataQuality {
            not_thru_count: 0,
            internal_count: 0,
            turn_channel_count: 0,
            culdesac_count: 0,
            timed_restrictions: 0,
            simple_restrictions: 0,
            reclassified_links: 0,
            node_counts: vec![0; MAX_DEGREE_BUCKETS],
            issues: Vec::new(),
        }
    }
}

impl DataQuality {
    pub fn add_issue(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    pub fn count_node_degree(&mut self, degree: usize) {
        self.node_counts[degree.min(MAX_DEGREE_BUCKETS - 1)] += 1;
    }

    /// Fold another worker's statistics into this one.
    pub fn add_statistics(&mut self, other: &DataQuality) {
        self.not_thru_count += other.not_thru_count;
        self.internal_count += other.internal_count;
        self.turn_channel_count += other.turn_channel_count;
        self.culdesac_count += other.culdesac_count;
        self.timed_restrictions += other.timed_restrictions;
        self.simple_restrictions += other.simple_restrictions;
        self.reclassified_links += other.reclassified_links;
        for (bucket, count) in other.node_counts.iter().enumerate() {
            self.node_counts[bucket] += count;
        }
        self.issues.extend(other.issues.iter().cloned());
    }

    pub fn log_statistics(&self) {
        println!("\n=== DATA QUALITY SUMMARY ===");
        println!("  Not-through edges:    {}", self.not_thru_count);
        println!("  Internal edges:       {}", self.internal_count);
        println!("  Turn channels:        {}", self.turn_channel_count);
        println!("  Cul-de-sacs:          {}", self.culdesac_count);
        println!("  Simple restrictions:  {}", self.simple_restrictions);
        println!("  Timed restrictions:   {} (skipped)", self.timed_restrictions);
        println!("  Reclassified links:   {}", self.reclassified_links);
        print!("  Node degrees:        ");
        for (degree, count) in self.node_counts.iter().enumerate() {
            if *count > 0 {
                print!(" {}:{}", degree, count);
            }
        }
        println!();
    }

    pub fn log_issues(&self) {
        if self.issues.is_empty() {
            return;
        }
        println!("  Issues ({}):", self.issues.len());
        for issue in &self.issues {
            println!("    - {}", issue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_statistics() {
        let mut a = DataQuality::default();
        a.not_thru_count = 2;
        a.count_node_degree(3);
        a.add_issue(Issue::UnconnectedLinkEdge { way_id: 10 });

        let mut b = DataQuality::default();
        b.not_thru_count = 1;
        b.turn_channel_count = 4;
        b.count_node_degree(3);
        b.count_node_degree(1);
        b.add_issue(Issue::DuplicateWay {
            way_id1: 1,
            way_id2: 2,
        });

        a.add_statistics(&b);
        assert_eq!(a.not_thru_count, 3);
        assert_eq!(a.turn_channel_count, 4);
        assert_eq!(a.node_counts[3], 2);
        assert_eq!(a.node_counts[1], 1);
        assert_eq!(a.issues.len(), 2);
    }

    #[test]
    fn test_degree_histogram_saturates() {
        let mut stats = DataQuality::default();
        stats.count_node_degree(5000);
        assert_eq!(stats.node_counts[MAX_DEGREE_BUCKETS - 1], 1);
    }
}

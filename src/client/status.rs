use std::fmt;

use size::Size;

const BAR_WIDTH: usize = 40;

/// Point-in-time view of a client, for display.
#[derive(Debug, Clone)]
pub struct Status {
    pub name: String,
    pub bitmap: Vec<bool>,
    pub peers: usize,
    pub uploaded: usize,
    pub downloaded: usize,
    /// Most recent block events, oldest first.
    pub updates: Vec<String>,
}

impl Status {
    pub fn completed_pieces(&self) -> usize {
        self.bitmap.iter().filter(|owned| **owned).count()
    }

    pub fn completed(&self) -> f64 {
        if self.bitmap.is_empty() {
            return 100f64;
        }
        100f64 * (self.completed_pieces() as f64) / (self.bitmap.len() as f64)
    }

    fn bar(&self) -> String {
        if self.bitmap.is_empty() {
            return "#".repeat(BAR_WIDTH);
        }
        (0..BAR_WIDTH)
            .map(|column| {
                let start = column * self.bitmap.len() / BAR_WIDTH;
                let end = ((column + 1) * self.bitmap.len() / BAR_WIDTH).max(start + 1);
                let slice = &self.bitmap[start..end.min(self.bitmap.len())];
                if slice.iter().all(|owned| *owned) {
                    '#'
                } else if slice.iter().any(|owned| *owned) {
                    '+'
                } else {
                    '.'
                }
            })
            .collect()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(
            f,
            "[{}] {:.1}% ({}/{} pieces)",
            self.bar(),
            self.completed(),
            self.completed_pieces(),
            self.bitmap.len()
        )?;
        writeln!(
            f,
            "peers: {}, downloaded: {}, uploaded: {}",
            self.peers,
            Size::from_bytes(self.downloaded),
            Size::from_bytes(self.uploaded)
        )?;
        for update in &self.updates {
            writeln!(f, "  {}", update)?;
        }
        Ok(())
    }
}

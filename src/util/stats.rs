use std::fmt::Display;

/// Running minimum, maximum and average of a series of counts.
#[derive(Clone, Debug, PartialEq)]
pub struct Stats {
    pub count: usize,
    pub min: usize,
    pub max: usize,
    pub avg: f32,
}

impl Stats {
    pub fn add_sample(&mut self, value: usize) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.avg += (value as f32 - self.avg) / (self.count as f32);
    }

    pub fn add_samples(&mut self, values: impl IntoIterator<Item = usize>) {
        for v in values {
            self.add_sample(v);
        }
    }

    pub fn merge(&self, other: &Self) -> Self {
        Stats {
            count: self.count + other.count,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            avg: if self.count > 0 || other.count > 0 {
                (self.avg * self.count as f32 + other.avg * other.count as f32)
                    / (self.count + other.count) as f32
            } else {
                0.0
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            count: 0,
            min: usize::MAX,
            max: 0,
            avg: 0.0,
        }
    }
}

impl FromIterator<usize> for Stats {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut ret = Stats::default();
        ret.add_samples(iter);
        ret
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "no samples");
        }
        write!(
            f,
            "{} - {}; avg {:.1}; {} samples",
            self.min, self.max, self.avg, self.count
        )
    }
}

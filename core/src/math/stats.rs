pub struct StatsHelper;

impl StatsHelper {
    pub fn mean<'a, I>(values: I) -> Option<f32>
    where
        I: IntoIterator<Item = &'a f32>,
    {
        let (sum, count) = values
            .into_iter()
            .fold((0.0f32, 0usize), |(sum, count), &v| (sum + v, count + 1));
        (count > 0).then(|| sum / count as f32)
    }

    /// Value at index `len/4` of the sorted copy.
    pub fn lower_quartile(values: &[f32]) -> Option<f32> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f32::total_cmp);
        Some(sorted[sorted.len() / 4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_empty_is_none() {
        assert_eq!(StatsHelper::mean(&[] as &[f32]), None);
        assert_eq!(StatsHelper::mean(&[1.0, 2.0, 6.0]), Some(3.0));
    }

    #[test]
    fn lower_quartile_picks_sorted_quarter_index() {
        let values = [8.0, 1.0, 7.0, 2.0, 6.0, 3.0, 5.0, 4.0];
        assert_eq!(StatsHelper::lower_quartile(&values), Some(3.0));
        assert_eq!(StatsHelper::lower_quartile(&[]), None);
    }
}

use crate::domain::model::{Preview, Record, TabularData};

pub const DEFAULT_SAMPLE_ROWS: usize = 10;

pub fn build_preview(data: &TabularData, sample_rows: usize) -> Preview {
    let sample = data
        .rows
        .iter()
        .take(sample_rows)
        .map(|row| {
            data.columns
                .iter()
                .zip(row)
                .map(|(column, cell)| (column.clone(), cell.to_json()))
                .collect::<Record>()
        })
        .collect();

    Preview {
        columns: data.columns.clone(),
        sample,
    }
}

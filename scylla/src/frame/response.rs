use bytes::Bytes;

/// One decoded row. Column decoding lives entirely outside this crate; a row
/// is just the opaque bytes of each column as the wire layer produced them.
#[derive(Debug, Default, Clone)]
pub struct Row {
    pub columns: Vec<Option<Bytes>>,
}

/// One page of rows, as handed back by `query.execute(..)` on success.
#[derive(Debug, Default, Clone)]
pub struct Rows {
    pub rows: Vec<Row>,
    pub paging_state: Option<Bytes>,
}

use crate::common::{PageId, QuarryError, Result, PAGE_SIZE};

/// Header page layout (page 0 of the database file):
///
/// | Field        | Offset | Size |
/// |--------------|--------|------|
/// | record_count | 0      | 4    |
/// | records      | 4      | ...  |
///
/// Each record maps an index name to its root page ID:
///
/// | Field        | Offset | Size |
/// |--------------|--------|------|
/// | name         | 0      | 32   |
/// | root_page_id | 32     | 4    |
///
/// A zeroed page is a valid empty header page.
const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

fn encode_name(name: &str) -> [u8; NAME_SIZE] {
    debug_assert!(name.len() < NAME_SIZE, "index name too long");
    let mut buf = [0u8; NAME_SIZE];
    let len = name.len().min(NAME_SIZE);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);
    buf
}

/// Mutable view over the header page that records every index's root page.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn init(&mut self) {
        self.data.fill(0);
    }

    pub fn record_count(&self) -> usize {
        HeaderPageRef::new(self.data).record_count()
    }

    pub fn get_record(&self, name: &str) -> Option<PageId> {
        HeaderPageRef::new(self.data).get_record(name)
    }

    /// Adds a new `name -> root_page_id` record.
    /// Returns false if a record with this name already exists.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> Result<bool> {
        if self.find_record(name).is_some() {
            return Ok(false);
        }

        let count = self.record_count();
        if count >= MAX_RECORDS {
            return Err(QuarryError::HeaderPageFull);
        }

        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        self.data[offset..offset + NAME_SIZE].copy_from_slice(&encode_name(name));
        self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
            .copy_from_slice(&root_page_id.as_u32().to_le_bytes());
        self.set_record_count(count + 1);
        Ok(true)
    }

    /// Rewrites the root page ID of an existing record.
    /// Returns false if no record with this name exists.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        match self.find_record(name) {
            Some(index) => {
                let offset = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
                self.data[offset..offset + 4]
                    .copy_from_slice(&root_page_id.as_u32().to_le_bytes());
                true
            }
            None => false,
        }
    }

    /// Removes a record, compacting the table.
    /// Returns false if no record with this name exists.
    pub fn delete_record(&mut self, name: &str) -> bool {
        match self.find_record(name) {
            Some(index) => {
                let count = self.record_count();
                let start = RECORDS_OFFSET + (index + 1) * RECORD_SIZE;
                let end = RECORDS_OFFSET + count * RECORD_SIZE;
                self.data
                    .copy_within(start..end, RECORDS_OFFSET + index * RECORD_SIZE);
                self.set_record_count(count - 1);
                true
            }
            None => false,
        }
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        HeaderPageRef::new(self.data).find_record(name)
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&(count as u32).to_le_bytes());
    }
}

/// Read-only view over the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        let bytes: [u8; 4] = self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .try_into()
            .unwrap();
        u32::from_le_bytes(bytes) as usize
    }

    pub fn get_record(&self, name: &str) -> Option<PageId> {
        self.find_record(name).map(|index| {
            let offset = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
            let bytes: [u8; 4] = self.data[offset..offset + 4].try_into().unwrap();
            PageId::new(u32::from_le_bytes(bytes))
        })
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        let encoded = encode_name(name);
        (0..self.record_count()).find(|&i| {
            let offset = RECORDS_OFFSET + i * RECORD_SIZE;
            self.data[offset..offset + NAME_SIZE] == encoded
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_page_insert_get() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);
        header.init();

        assert!(header.insert_record("orders_pk", PageId::new(7)).unwrap());
        assert!(header.insert_record("users_pk", PageId::new(12)).unwrap());

        assert_eq!(header.get_record("orders_pk"), Some(PageId::new(7)));
        assert_eq!(header.get_record("users_pk"), Some(PageId::new(12)));
        assert_eq!(header.get_record("missing"), None);
        assert_eq!(header.record_count(), 2);
    }

    #[test]
    fn test_header_page_duplicate_insert() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);
        header.init();

        assert!(header.insert_record("idx", PageId::new(1)).unwrap());
        assert!(!header.insert_record("idx", PageId::new(2)).unwrap());
        assert_eq!(header.get_record("idx"), Some(PageId::new(1)));
    }

    #[test]
    fn test_header_page_update() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);
        header.init();

        assert!(!header.update_record("idx", PageId::new(2)));
        header.insert_record("idx", PageId::new(1)).unwrap();
        assert!(header.update_record("idx", PageId::new(2)));
        assert_eq!(header.get_record("idx"), Some(PageId::new(2)));
    }

    #[test]
    fn test_header_page_delete() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);
        header.init();

        header.insert_record("a", PageId::new(1)).unwrap();
        header.insert_record("b", PageId::new(2)).unwrap();
        header.insert_record("c", PageId::new(3)).unwrap();

        assert!(header.delete_record("b"));
        assert!(!header.delete_record("b"));

        assert_eq!(header.record_count(), 2);
        assert_eq!(header.get_record("a"), Some(PageId::new(1)));
        assert_eq!(header.get_record("c"), Some(PageId::new(3)));
    }

    #[test]
    fn test_header_page_zeroed_is_empty() {
        let data = [0u8; PAGE_SIZE];
        let header = HeaderPageRef::new(&data);
        assert_eq!(header.record_count(), 0);
        assert_eq!(header.get_record("anything"), None);
    }
}

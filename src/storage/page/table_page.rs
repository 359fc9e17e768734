use crate::common::{PageId, QuarryError, RecordId, Result, SlotId, PAGE_SIZE};

/// Table page layout (slotted):
///
/// | Field              | Offset | Size |
/// |--------------------|--------|------|
/// | page_id            | 0      | 4    |
/// | next_page_id       | 4      | 4    |
/// | tuple_count        | 8      | 2    |
/// | free_space_pointer | 10     | 2    |
/// | slot array         | 12     | 4*n  |
///
/// Each slot is `(offset: u16, len: u16)`. The slot array grows down the
/// page while tuple data grows up from the end; `free_space_pointer` marks
/// the start of the tuple data region. A deleted tuple keeps its slot as a
/// tombstone with `len == 0` so existing RecordIds stay stable.
const PAGE_ID_OFFSET: usize = 0;
const NEXT_PAGE_ID_OFFSET: usize = 4;
const TUPLE_COUNT_OFFSET: usize = 8;
const FREE_SPACE_PTR_OFFSET: usize = 10;
const SLOT_ARRAY_OFFSET: usize = 12;

const SLOT_SIZE: usize = 4;

const INVALID_PAGE: u32 = u32::MAX;

/// Mutable view over a slotted table page.
pub struct TablePage<'a> {
    data: &'a mut [u8],
}

impl<'a> TablePage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    /// Initializes a fresh table page.
    pub fn init(&mut self, page_id: PageId) {
        self.data.fill(0);
        self.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4]
            .copy_from_slice(&page_id.as_u32().to_le_bytes());
        self.set_next_page_id(None);
        self.set_tuple_count(0);
        self.set_free_space_pointer(PAGE_SIZE as u16);
    }

    pub fn page_id(&self) -> PageId {
        TablePageRef::new(self.data).page_id()
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        TablePageRef::new(self.data).next_page_id()
    }

    pub fn set_next_page_id(&mut self, page_id: Option<PageId>) {
        let value = page_id.map(|p| p.as_u32()).unwrap_or(INVALID_PAGE);
        self.data[NEXT_PAGE_ID_OFFSET..NEXT_PAGE_ID_OFFSET + 4]
            .copy_from_slice(&value.to_le_bytes());
    }

    pub fn tuple_count(&self) -> u16 {
        TablePageRef::new(self.data).tuple_count()
    }

    pub fn free_space(&self) -> usize {
        TablePageRef::new(self.data).free_space()
    }

    /// Inserts a tuple and returns its RecordId.
    pub fn insert_tuple(&mut self, tuple: &[u8]) -> Result<RecordId> {
        let needed = tuple.len() + SLOT_SIZE;
        let available = self.free_space();
        if needed > available {
            return Err(QuarryError::PageOverflow {
                tuple_size: tuple.len(),
                available,
            });
        }

        let count = self.tuple_count();
        let offset = self.free_space_pointer() - tuple.len() as u16;
        self.data[offset as usize..offset as usize + tuple.len()].copy_from_slice(tuple);

        self.set_slot(count, offset, tuple.len() as u16);
        self.set_tuple_count(count + 1);
        self.set_free_space_pointer(offset);

        Ok(RecordId::new(self.page_id(), SlotId::new(count)))
    }

    /// Marks a tuple as deleted, leaving a tombstone slot behind.
    pub fn mark_delete(&mut self, slot_id: SlotId) -> Result<()> {
        let count = self.tuple_count();
        if slot_id.as_u16() >= count {
            return Err(QuarryError::InvalidSlotId(slot_id.as_u16()));
        }
        let (offset, _) = self.slot(slot_id.as_u16());
        self.set_slot(slot_id.as_u16(), offset, 0);
        Ok(())
    }

    /// Replaces a tuple in place. The replacement is appended to the tuple
    /// data region when it no longer fits the old slot.
    pub fn update_tuple(&mut self, slot_id: SlotId, tuple: &[u8]) -> Result<()> {
        let count = self.tuple_count();
        if slot_id.as_u16() >= count {
            return Err(QuarryError::InvalidSlotId(slot_id.as_u16()));
        }

        let (offset, len) = self.slot(slot_id.as_u16());
        if len == 0 {
            return Err(QuarryError::EmptySlot(slot_id.as_u16()));
        }

        if tuple.len() <= len as usize {
            self.data[offset as usize..offset as usize + tuple.len()].copy_from_slice(tuple);
            self.set_slot(slot_id.as_u16(), offset, tuple.len() as u16);
            return Ok(());
        }

        let available = self.free_space();
        if tuple.len() > available {
            return Err(QuarryError::PageOverflow {
                tuple_size: tuple.len(),
                available,
            });
        }

        let new_offset = self.free_space_pointer() - tuple.len() as u16;
        self.data[new_offset as usize..new_offset as usize + tuple.len()].copy_from_slice(tuple);
        self.set_slot(slot_id.as_u16(), new_offset, tuple.len() as u16);
        self.set_free_space_pointer(new_offset);
        Ok(())
    }

    pub fn get_tuple(&self, slot_id: SlotId) -> Result<&[u8]> {
        let (offset, len) = {
            let page = TablePageRef::new(self.data);
            page.checked_slot(slot_id)?
        };
        Ok(&self.data[offset as usize..offset as usize + len as usize])
    }

    fn free_space_pointer(&self) -> u16 {
        TablePageRef::new(self.data).free_space_pointer()
    }

    fn set_free_space_pointer(&mut self, ptr: u16) {
        self.data[FREE_SPACE_PTR_OFFSET..FREE_SPACE_PTR_OFFSET + 2]
            .copy_from_slice(&ptr.to_le_bytes());
    }

    fn set_tuple_count(&mut self, count: u16) {
        self.data[TUPLE_COUNT_OFFSET..TUPLE_COUNT_OFFSET + 2]
            .copy_from_slice(&count.to_le_bytes());
    }

    fn slot(&self, index: u16) -> (u16, u16) {
        TablePageRef::new(self.data).slot(index)
    }

    fn set_slot(&mut self, index: u16, offset: u16, len: u16) {
        let slot_offset = SLOT_ARRAY_OFFSET + index as usize * SLOT_SIZE;
        self.data[slot_offset..slot_offset + 2].copy_from_slice(&offset.to_le_bytes());
        self.data[slot_offset + 2..slot_offset + 4].copy_from_slice(&len.to_le_bytes());
    }
}

/// Read-only view over a slotted table page.
pub struct TablePageRef<'a> {
    data: &'a [u8],
}

impl<'a> TablePageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn page_id(&self) -> PageId {
        let bytes: [u8; 4] = self.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4]
            .try_into()
            .unwrap();
        PageId::new(u32::from_le_bytes(bytes))
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        let bytes: [u8; 4] = self.data[NEXT_PAGE_ID_OFFSET..NEXT_PAGE_ID_OFFSET + 4]
            .try_into()
            .unwrap();
        let value = u32::from_le_bytes(bytes);
        if value == INVALID_PAGE {
            None
        } else {
            Some(PageId::new(value))
        }
    }

    pub fn tuple_count(&self) -> u16 {
        let bytes: [u8; 2] = self.data[TUPLE_COUNT_OFFSET..TUPLE_COUNT_OFFSET + 2]
            .try_into()
            .unwrap();
        u16::from_le_bytes(bytes)
    }

    pub fn free_space(&self) -> usize {
        let slots_end = SLOT_ARRAY_OFFSET + self.tuple_count() as usize * SLOT_SIZE;
        self.free_space_pointer() as usize - slots_end
    }

    pub fn get_tuple(&self, slot_id: SlotId) -> Result<&'a [u8]> {
        let (offset, len) = self.checked_slot(slot_id)?;
        Ok(&self.data[offset as usize..offset as usize + len as usize])
    }

    fn checked_slot(&self, slot_id: SlotId) -> Result<(u16, u16)> {
        if slot_id.as_u16() >= self.tuple_count() {
            return Err(QuarryError::InvalidSlotId(slot_id.as_u16()));
        }
        let (offset, len) = self.slot(slot_id.as_u16());
        if len == 0 {
            return Err(QuarryError::EmptySlot(slot_id.as_u16()));
        }
        Ok((offset, len))
    }

    fn free_space_pointer(&self) -> u16 {
        let bytes: [u8; 2] = self.data[FREE_SPACE_PTR_OFFSET..FREE_SPACE_PTR_OFFSET + 2]
            .try_into()
            .unwrap();
        u16::from_le_bytes(bytes)
    }

    fn slot(&self, index: u16) -> (u16, u16) {
        let slot_offset = SLOT_ARRAY_OFFSET + index as usize * SLOT_SIZE;
        let offset: [u8; 2] = self.data[slot_offset..slot_offset + 2].try_into().unwrap();
        let len: [u8; 2] = self.data[slot_offset + 2..slot_offset + 4]
            .try_into()
            .unwrap();
        (u16::from_le_bytes(offset), u16::from_le_bytes(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_page(data: &mut [u8; PAGE_SIZE]) -> TablePage<'_> {
        let mut page = TablePage::new(data);
        page.init(PageId::new(1));
        page
    }

    #[test]
    fn test_table_page_insert_get() {
        let mut data = [0u8; PAGE_SIZE];
        let mut page = fresh_page(&mut data);

        let rid1 = page.insert_tuple(b"hello").unwrap();
        let rid2 = page.insert_tuple(b"world!").unwrap();

        assert_eq!(rid1, RecordId::new(PageId::new(1), SlotId::new(0)));
        assert_eq!(rid2, RecordId::new(PageId::new(1), SlotId::new(1)));
        assert_eq!(page.get_tuple(SlotId::new(0)).unwrap(), b"hello");
        assert_eq!(page.get_tuple(SlotId::new(1)).unwrap(), b"world!");
        assert_eq!(page.tuple_count(), 2);
    }

    #[test]
    fn test_table_page_mark_delete() {
        let mut data = [0u8; PAGE_SIZE];
        let mut page = fresh_page(&mut data);

        let rid = page.insert_tuple(b"doomed").unwrap();
        page.insert_tuple(b"survivor").unwrap();

        page.mark_delete(rid.slot_id).unwrap();

        assert!(matches!(
            page.get_tuple(rid.slot_id),
            Err(QuarryError::EmptySlot(0))
        ));
        // RecordIds of later tuples stay valid
        assert_eq!(page.get_tuple(SlotId::new(1)).unwrap(), b"survivor");
    }

    #[test]
    fn test_table_page_update() {
        let mut data = [0u8; PAGE_SIZE];
        let mut page = fresh_page(&mut data);

        let rid = page.insert_tuple(b"original value").unwrap();

        page.update_tuple(rid.slot_id, b"short").unwrap();
        assert_eq!(page.get_tuple(rid.slot_id).unwrap(), b"short");

        page.update_tuple(rid.slot_id, b"a considerably longer replacement")
            .unwrap();
        assert_eq!(
            page.get_tuple(rid.slot_id).unwrap(),
            b"a considerably longer replacement"
        );
    }

    #[test]
    fn test_table_page_overflow() {
        let mut data = [0u8; PAGE_SIZE];
        let mut page = fresh_page(&mut data);

        let big = vec![0xABu8; PAGE_SIZE];
        assert!(matches!(
            page.insert_tuple(&big),
            Err(QuarryError::PageOverflow { .. })
        ));
        assert_eq!(page.tuple_count(), 0);
    }

    #[test]
    fn test_table_page_free_space_shrinks() {
        let mut data = [0u8; PAGE_SIZE];
        let mut page = fresh_page(&mut data);

        let before = page.free_space();
        page.insert_tuple(b"0123456789").unwrap();
        assert_eq!(page.free_space(), before - 10 - SLOT_SIZE);
    }
}

// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;

#[test]
fn test_system_storage() {
    let storage = SystemStorage::new(1024).unwrap();
    assert_eq!(storage.size(), 1024);
    assert_eq!(storage.storage_kind(), StorageKind::System);
    assert!(storage.addr() != 0);
    assert_eq!(storage.addr() % 64, 0);

    let storage2 = SystemStorage::new(2048).unwrap();
    assert_eq!(storage2.size(), 2048);
    assert_ne!(storage.addr(), storage2.addr());
}

#[test]
fn test_system_storage_zero_size() {
    let result = SystemStorage::new(0);
    assert!(matches!(
        result.unwrap_err(),
        StorageError::AllocationFailed(_)
    ));
}

#[test]
fn test_system_storage_is_zeroed() {
    let storage = SystemStorage::new(256).unwrap();
    // SAFETY: the storage is host memory of the given size, not shared
    let bytes = unsafe { std::slice::from_raw_parts(storage.addr() as *const u8, 256) };
    assert!(bytes.iter().all(|b| *b == 0));
}

#[test]
fn test_type_erasure() {
    let storage = SystemStorage::new(1024).unwrap();
    let addr = storage.addr();
    let buffer = create_buffer(storage);

    assert_eq!(buffer.size(), 1024);
    assert_eq!(buffer.addr(), addr);
    assert_eq!(buffer.storage_kind(), StorageKind::System);
    assert!(buffer.as_any().downcast_ref::<SystemStorage>().is_some());

    let other = buffer.clone();
    assert_eq!(buffer.handle_count(), 2);
    drop(other);
    assert_eq!(buffer.handle_count(), 1);

    assert_eq!(buffer.region(), MemoryRegion::new(addr, 1024));
}

#[test]
fn test_memory_region() {
    let region = MemoryRegion::new(0x1000, 4096);
    assert_eq!(region.addr(), 0x1000);
    assert_eq!(region.size(), 4096);

    let sub = region.slice(1024, 512).unwrap();
    assert_eq!(sub, MemoryRegion::new(0x1400, 512));

    assert!(region.slice(4000, 97).is_err());
    assert!(region.slice(usize::MAX, 1).is_err());
    assert_eq!(region.slice(4096, 0).unwrap().size(), 0);
}

#[test]
fn test_storage_kind_addressability() {
    assert!(StorageKind::System.is_host_addressable());
    assert!(StorageKind::Pinned.is_host_addressable());
    assert!(!StorageKind::Device(0).is_host_addressable());
}

#[cfg(feature = "testing-cuda")]
mod cuda_tests {
    use super::*;

    #[test]
    fn test_pinned_storage() {
        let storage = PinnedStorage::new(2048, 0).unwrap();
        assert_eq!(storage.size(), 2048);
        assert_eq!(storage.storage_kind(), StorageKind::Pinned);
        assert!(storage.addr() != 0);
        assert!(storage.storage_kind().is_host_addressable());
    }

    #[test]
    fn test_pinned_storage_zero_size() {
        assert!(matches!(
            PinnedStorage::new(0, 0).unwrap_err(),
            StorageError::AllocationFailed(_)
        ));
    }

    #[test]
    fn test_device_storage() {
        let storage = DeviceStorage::new(4096, 0).unwrap();
        assert_eq!(storage.size(), 4096);
        assert_eq!(storage.storage_kind(), StorageKind::Device(0));
        assert!(storage.addr() != 0);
        assert_eq!(storage.device_id(), 0);
    }

    #[test]
    fn test_device_storage_zero_size() {
        assert!(matches!(
            DeviceStorage::new(0, 0).unwrap_err(),
            StorageError::AllocationFailed(_)
        ));
    }

    #[test]
    fn test_context_is_shared() {
        let a = cuda_context(0).unwrap();
        let b = cuda_context(0).unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }
}

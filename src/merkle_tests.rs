#[cfg(test)]
mod tests {
    use crate::error::TreeError;
    use crate::ethereum::parse_address;
    use crate::hash::{keccak256, keccak_sorted_pair};
    use crate::merkle::{address_leaf, verify_ioc_proof, IocBatchTree};

    fn leaves(n: u8) -> Vec<[u8; 32]> {
        (1..=n).map(|i| [i; 32]).collect()
    }

    #[test]
    fn test_ioc_tree_creation() {
        let tree = IocBatchTree::new(leaves(4)).unwrap();
        assert_ne!(tree.root(), [0u8; 32]);
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn test_ioc_tree_empty() {
        assert_eq!(IocBatchTree::new(Vec::new()).unwrap_err(), TreeError::EmptyTree);
        let none: Vec<String> = Vec::new();
        assert!(IocBatchTree::from_iocs(none.as_slice()).is_err());
    }

    #[test]
    fn test_single_leaf_is_root() {
        let tree = IocBatchTree::new(vec![[7u8; 32]]).unwrap();
        assert_eq!(tree.root(), [7u8; 32]);
        let proof = tree.generate_proof(0).unwrap();
        assert!(proof.siblings.is_empty());
        assert!(tree.verify_proof(&proof));
    }

    #[test]
    fn test_sorted_pairs_make_root_order_independent_within_pair() {
        let a = keccak256(b"a");
        let b = keccak256(b"b");
        let ab = IocBatchTree::new(vec![a, b]).unwrap();
        let ba = IocBatchTree::new(vec![b, a]).unwrap();
        assert_eq!(ab.root(), ba.root());
        assert_eq!(ab.root(), keccak_sorted_pair(&a, &b));
    }

    #[test]
    fn test_odd_node_is_promoted() {
        let l = leaves(3);
        let tree = IocBatchTree::new(l.clone()).unwrap();
        let expected = keccak_sorted_pair(&keccak_sorted_pair(&l[0], &l[1]), &l[2]);
        assert_eq!(tree.root(), expected);

        // The promoted leaf skips a level and so carries one sibling.
        let proof = tree.generate_proof(2).unwrap();
        assert_eq!(proof.siblings.len(), 1);
        assert!(tree.verify_proof(&proof));
    }

    #[test]
    fn test_every_proof_verifies() {
        for n in 1..=9u8 {
            let tree = IocBatchTree::new(leaves(n)).unwrap();
            for i in 0..n as usize {
                let proof = tree.generate_proof(i).unwrap();
                assert!(tree.verify_proof(&proof), "n={} leaf={}", n, i);
            }
        }
    }

    #[test]
    fn test_large_tree() {
        let leaves: Vec<[u8; 32]> = (0..1024u32)
            .map(|i| {
                let mut leaf = [0u8; 32];
                leaf[0..4].copy_from_slice(&i.to_be_bytes());
                leaf
            })
            .collect();
        let tree = IocBatchTree::new(leaves).unwrap();
        let proof = tree.generate_proof(512).unwrap();
        assert_eq!(proof.siblings.len(), 10);
        assert!(tree.verify_proof(&proof));
    }

    #[test]
    fn test_invalid_index() {
        let tree = IocBatchTree::new(leaves(4)).unwrap();
        assert!(tree.generate_proof(999).is_none());
    }

    #[test]
    fn test_proof_from_other_tree_rejected() {
        let tree1 = IocBatchTree::new(leaves(4)).unwrap();
        let tree2 = IocBatchTree::new(vec![[5u8; 32], [6u8; 32], [7u8; 32], [8u8; 32]]).unwrap();
        let proof = tree1.generate_proof(0).unwrap();
        assert!(!tree2.verify_proof(&proof));
    }

    #[test]
    fn test_tampered_proofs_rejected() {
        let tree = IocBatchTree::new(leaves(4)).unwrap();

        let mut proof = tree.generate_proof(0).unwrap();
        proof.root = [0xFFu8; 32];
        assert!(!tree.verify_proof(&proof));

        let mut proof = tree.generate_proof(0).unwrap();
        proof.leaf = [0xFFu8; 32];
        assert!(!tree.verify_proof(&proof));

        let mut proof = tree.generate_proof(0).unwrap();
        proof.siblings[0] = [0xFFu8; 32];
        assert!(!tree.verify_proof(&proof));
    }

    #[test]
    fn test_ioc_strings_and_lookup() {
        let iocs = ["198.51.100.7", "evil.example", "d41d8cd98f00b204e9800998ecf8427e"];
        let tree = IocBatchTree::from_iocs(&iocs[..]).unwrap();
        let leaf = keccak256(b"evil.example");
        let proof = tree.proof_for_leaf(&leaf).unwrap();
        assert_eq!(proof.index, 1);
        assert!(verify_ioc_proof(&proof.leaf, &proof.siblings, &tree.root()));
        assert!(tree.root_hex().starts_with("0x"));
        assert_eq!(tree.root_hex().len(), 66);
    }

    #[test]
    fn test_legacy_address_leaves() {
        let addresses: Vec<_> = ["0xAAA", "0xBBB", "0xCCC"]
            .iter()
            .map(|a| parse_address(a).unwrap())
            .collect();
        let tree = IocBatchTree::from_addresses(&addresses).unwrap();
        assert_eq!(tree.leaves()[1], address_leaf(&addresses[1]));
        let proof = tree.proof_for_leaf(&address_leaf(&addresses[2])).unwrap();
        assert!(tree.verify_proof(&proof));
    }
}

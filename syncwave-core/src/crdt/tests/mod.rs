/*
    Property tests for the merge laws:
    - Commutativity: merge(a, b) == merge(b, a) for a commutative merge
    - Idempotence: merge(a, a) == a for any merge
    - Clock monotonicity: merging never decreases a counter
*/

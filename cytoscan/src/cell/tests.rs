use super::*;

fn square(x0: u32, y0: u32, side: u32) -> Vec<Point> {
    let mut points = Vec::new();
    for y in y0..y0 + side {
        for x in x0..x0 + side {
            points.push(Point::new(x, y));
        }
    }
    points
}

#[test]
fn test_assemble_assigns_ids_in_order() {
    let sets = vec![
        vec![CellCompartment::new(NUCLEUS, square(0, 0, 2))],
        vec![CellCompartment::new(NUCLEUS, square(10, 10, 3))],
        vec![CellCompartment::new(NUCLEUS, square(20, 0, 1))],
    ];
    let cells = CellAssembler::new().assemble(sets);
    let ids: Vec<u32> = cells.iter().map(|c| c.id().0).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(cells[1].pixel_count(NUCLEUS), 9);

    let cells = CellAssembler::with_start_id(7).assemble(vec![vec![], vec![]]);
    assert_eq!(cells[0].id(), CellId(7));
    assert_eq!(cells[1].id(), CellId(8));
}

#[test]
fn test_clone_is_deep() {
    let mut original = Cell::new(CellId(3));
    original.insert(CellCompartment::new(NUCLEUS, square(0, 0, 2)));

    let mut copy = original.clone();
    copy.release_coordinates();
    copy.insert(CellCompartment::new(CYTOPLASM, square(5, 5, 1)));

    assert_eq!(original.compartment(NUCLEUS).unwrap().coordinates().unwrap().len(), 4);
    assert!(original.compartment(CYTOPLASM).is_none());
    assert!(copy.compartment(NUCLEUS).unwrap().is_released());
}

#[test]
fn test_release_keeps_name_and_count() {
    let mut cell = Cell::new(CellId(0));
    cell.insert(CellCompartment::new(WHOLE_CELL, square(1, 1, 4)));
    cell.release_coordinates();

    let whole = cell.compartment(WHOLE_CELL).unwrap();
    assert_eq!(whole.name(), WHOLE_CELL);
    assert_eq!(whole.pixel_count(), 16);
    assert!(whole.coordinates().is_none());
}

#[test]
fn test_bounding_box_two_points() {
    let points = vec![Point::new(4, 9), Point::new(2, 3), Point::new(7, 5)];
    let bbox = CellCompartment::bounding_box(&points);
    assert_eq!(bbox.name(), BOUNDING_BOX);
    assert_eq!(bbox.coordinates().unwrap(), &[Point::new(2, 3), Point::new(7, 9)]);

    // Single-pixel region: both corners coincide.
    let bbox = CellCompartment::bounding_box(&[Point::new(1, 1)]);
    assert_eq!(bbox.coordinates().unwrap(), &[Point::new(1, 1), Point::new(1, 1)]);
}

#[test]
fn test_missing_compartment_counts_zero() {
    let cell = Cell::new(CellId(0));
    assert_eq!(cell.pixel_count(CYTOPLASM), 0);
}

#[test]
fn test_cell_serde_preserves_released_state() {
    let mut cell = Cell::new(CellId(12));
    cell.insert(CellCompartment::new(NUCLEUS, square(0, 0, 3)));
    cell.insert(CellCompartment::new(CYTOPLASM, square(3, 0, 2)));
    cell.compartments.get_mut(CYTOPLASM).unwrap().release_coordinates();

    let json = serde_json::to_string(&cell).unwrap();
    let back: Cell = serde_json::from_str(&json).unwrap();
    assert_eq!(back, cell);
    assert_eq!(back.pixel_count(CYTOPLASM), 4);
}

//! Walkthrough of the sorted list map: inserts, lookups, an overwriting
//! insert, and removals, printing the map between steps.

use cairn_map::SortedListMap;

fn show(map: &SortedListMap<i32, String>) {
    map.for_each(|key, value| print!("{}:{}, ", key, value));
    println!();
}

fn main() {
    env_logger::init();

    let map = SortedListMap::new();

    map.insert(7, "foo".to_string());
    map.insert(3, "bar".to_string());
    map.insert(5, "baz".to_string());

    show(&map);

    println!("{:?}", map.get(&5));
    println!("{:?}", map.get(&6));

    show(&map);

    println!("{:?}", map.insert(3, "hoge".to_string()));
    println!("{:?}", map.insert(4, "fuga".to_string()));

    show(&map);

    println!("{:?}", map.remove(&5));
    println!("{:?}", map.remove(&6));

    show(&map);
}
